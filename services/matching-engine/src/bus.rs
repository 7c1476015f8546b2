//! Subscription bus
//!
//! Fans executed trades and top-of-book updates out to registered sinks.
//! Delivery runs on a dedicated thread fed by an unbounded channel, so the
//! matching hot path never waits on a subscriber, and a slow subscriber
//! only delays other subscribers, not matching.

use crossbeam_channel::{unbounded, Receiver, Sender};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use tracing::{debug, warn};
use types::ids::Symbol;
use types::numeric::Price;
use types::trade::Trade;

use crate::ports::TradeSink;

/// Top-of-book delta published when best bid or best ask changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataUpdate {
    pub symbol: Symbol,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub last_price: Option<Price>,
    pub volume: Decimal,
    pub trade_count: u64,
    pub ts_micros: i64,
}

/// Receives every executed trade.
pub trait TradeSubscriber: Send + Sync {
    fn on_trade(&self, trade: &Trade);
}

/// Receives top-of-book changes.
pub trait MarketDataSubscriber: Send + Sync {
    fn on_top_of_book(&self, update: &MarketDataUpdate);
}

enum BusMessage {
    Trade(Trade),
    TopOfBook(MarketDataUpdate),
    Shutdown,
}

/// Fan-out bus with an offloaded delivery thread.
pub struct EventBus {
    tx: Sender<BusMessage>,
    rx: Receiver<BusMessage>,
    trade_subscribers: Arc<RwLock<Vec<Arc<dyn TradeSubscriber>>>>,
    market_data_subscribers: Arc<RwLock<Vec<Arc<dyn MarketDataSubscriber>>>>,
    trade_sink: Arc<RwLock<Option<Arc<dyn TradeSink>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            trade_subscribers: Arc::new(RwLock::new(Vec::new())),
            market_data_subscribers: Arc::new(RwLock::new(Vec::new())),
            trade_sink: Arc::new(RwLock::new(None)),
            worker: Mutex::new(None),
        }
    }

    pub fn subscribe_trades(&self, subscriber: Arc<dyn TradeSubscriber>) {
        self.trade_subscribers
            .write()
            .expect("bus lock poisoned")
            .push(subscriber);
    }

    pub fn subscribe_market_data(&self, subscriber: Arc<dyn MarketDataSubscriber>) {
        self.market_data_subscribers
            .write()
            .expect("bus lock poisoned")
            .push(subscriber);
    }

    /// Install the optional write-behind trade sink.
    pub fn set_trade_sink(&self, sink: Arc<dyn TradeSink>) {
        *self.trade_sink.write().expect("bus lock poisoned") = Some(sink);
    }

    /// Spawn the delivery thread. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock().expect("bus lock poisoned");
        if worker.is_some() {
            return;
        }

        let rx = self.rx.clone();
        let trade_subscribers = Arc::clone(&self.trade_subscribers);
        let market_data_subscribers = Arc::clone(&self.market_data_subscribers);
        let trade_sink = Arc::clone(&self.trade_sink);

        *worker = Some(std::thread::spawn(move || {
            while let Ok(message) = rx.recv() {
                match message {
                    BusMessage::Trade(trade) => {
                        for subscriber in trade_subscribers
                            .read()
                            .expect("bus lock poisoned")
                            .iter()
                        {
                            subscriber.on_trade(&trade);
                        }
                        let sink = trade_sink.read().expect("bus lock poisoned").clone();
                        if let Some(sink) = sink {
                            if let Err(err) = sink.record(&trade) {
                                warn!(trade_id = %trade.trade_id, %err, "trade sink failed");
                            }
                        }
                    }
                    BusMessage::TopOfBook(update) => {
                        for subscriber in market_data_subscribers
                            .read()
                            .expect("bus lock poisoned")
                            .iter()
                        {
                            subscriber.on_top_of_book(&update);
                        }
                    }
                    BusMessage::Shutdown => break,
                }
            }
            debug!("subscription bus stopped");
        }));
    }

    /// Deliver all queued events, then stop the delivery thread.
    pub fn stop(&self) {
        let handle = self.worker.lock().expect("bus lock poisoned").take();
        if let Some(handle) = handle {
            let _ = self.tx.send(BusMessage::Shutdown);
            let _ = handle.join();
        }
    }

    pub fn publish_trade(&self, trade: Trade) {
        let _ = self.tx.send(BusMessage::Trade(trade));
    }

    pub fn publish_top_of_book(&self, update: MarketDataUpdate) {
        let _ = self.tx.send(BusMessage::TopOfBook(update));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.stop();
    }
}
