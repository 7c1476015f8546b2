//! Matching dispatcher
//!
//! Process-wide front end. Validates request shape, routes each request to
//! the owning symbol's book, and keeps per-symbol execution strictly serial
//! while distinct symbols run in parallel.
//!
//! Each symbol gets a lane: the book behind a mutex plus a bounded priority
//! mailbox. A worker pool drains lanes off a ready-queue; a lane is on the
//! ready-queue at most once (the `scheduled` flag), so at most one worker
//! ever touches a symbol at a time. The expiry sweeper takes the same book
//! mutex, putting sweeps under the same per-symbol exclusion as submits.

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use types::errors::EngineError;
use types::ids::{OrderId, Symbol, UserId};
use types::numeric::{Price, Quantity};
use types::order::{Order, OrderType, Side};
use types::trade::Trade;

use crate::book::{BookStats, DepthLevel, OrderBook};
use crate::bus::{EventBus, MarketDataSubscriber, MarketDataUpdate, TradeSubscriber};
use crate::config::EngineConfig;
use crate::ports::{AcceptAllRisk, Authorizer, RiskGate, TradeSink};
use crate::requests::{
    CancelOrder, CancelResponse, EngineResponse, ModifyOrder, ModifyResponse, SubmitOrder,
    SubmitResponse,
};
use crate::snapshot::EngineSnapshot;

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_DRAINING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Engine-wide counters and status.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub orders_accepted: u64,
    pub trades_executed: u64,
    pub volume_traded: Decimal,
    pub active_symbols: usize,
    pub uptime_secs: u64,
    pub running: bool,
}

/// Depth of one symbol's book, both sides best-first.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthView {
    pub symbol: Symbol,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

enum Payload {
    Submit(Order),
    Cancel {
        id: OrderId,
        owner: UserId,
    },
    Modify {
        id: OrderId,
        owner: UserId,
        new_price: Option<Price>,
        new_quantity: Option<Quantity>,
    },
}

struct QueuedRequest {
    priority: i32,
    seq: u64,
    payload: Payload,
    reply: mpsc::Sender<EngineResponse>,
}

// Max-heap order: highest priority first, earliest admission first within a
// priority. Priority is only comparable within one symbol's mailbox.
impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

struct SymbolLane {
    symbol: Symbol,
    book: Mutex<OrderBook>,
    mailbox: Mutex<BinaryHeap<QueuedRequest>>,
    /// True while the lane is on the ready-queue or being drained.
    scheduled: AtomicBool,
}

impl SymbolLane {
    fn new(symbol: Symbol, max_trigger_depth: u32) -> Self {
        Self {
            book: Mutex::new(OrderBook::new(symbol.clone(), max_trigger_depth)),
            symbol,
            mailbox: Mutex::new(BinaryHeap::new()),
            scheduled: AtomicBool::new(false),
        }
    }

    fn idle(&self) -> bool {
        !self.scheduled.load(Ordering::SeqCst)
            && self.mailbox.lock().expect("mailbox lock poisoned").is_empty()
    }
}

enum WorkerMessage {
    Lane(Arc<SymbolLane>),
    Shutdown,
}

struct Shared {
    config: EngineConfig,
    state: AtomicU8,
    books: DashMap<Symbol, Arc<SymbolLane>>,
    /// Routes an order id to its owning symbol while the order is live.
    order_index: DashMap<OrderId, Symbol>,
    ready_tx: Sender<WorkerMessage>,
    /// Monotonic microsecond clock for arrival timestamps.
    clock: AtomicI64,
    admission_seq: AtomicU64,
    orders_accepted: AtomicU64,
    trades_executed: AtomicU64,
    volume: Mutex<Decimal>,
    bus: EventBus,
    authorizer: RwLock<Option<Arc<dyn Authorizer>>>,
    risk_gate: RwLock<Arc<dyn RiskGate>>,
}

impl Shared {
    fn next_timestamp(&self) -> i64 {
        let now = now_micros();
        loop {
            let last = self.clock.load(Ordering::SeqCst);
            let next = now.max(last + 1);
            if self
                .clock
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return next;
            }
        }
    }

    fn publish_trades_and_counters(&self, trades: &[Trade]) {
        if trades.is_empty() {
            return;
        }
        self.trades_executed
            .fetch_add(trades.len() as u64, Ordering::SeqCst);
        let batch_volume: Decimal = trades.iter().map(|t| t.quantity.as_decimal()).sum();
        *self.volume.lock().expect("volume lock poisoned") += batch_volume;
        for trade in trades {
            self.bus.publish_trade(trade.clone());
        }
    }

    fn market_data_from_stats(&self, stats: &BookStats) -> MarketDataUpdate {
        MarketDataUpdate {
            symbol: stats.symbol.clone(),
            best_bid: stats.best_bid,
            best_ask: stats.best_ask,
            last_price: stats.last_trade_price,
            volume: stats.volume,
            trade_count: stats.trade_count,
            ts_micros: self.next_timestamp(),
        }
    }

    /// Ownership gate: an installed authorizer decides; otherwise the
    /// order's own owner field does.
    fn owns(&self, order: &Order, owner: &UserId) -> bool {
        let authorizer = self
            .authorizer
            .read()
            .expect("authorizer lock poisoned")
            .clone();
        match authorizer {
            Some(authorizer) => authorizer.owns(owner, &order.id),
            None => order.owner == *owner,
        }
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Multi-symbol matching engine front end.
pub struct MatchingDispatcher {
    shared: Arc<Shared>,
    ready_rx: Receiver<WorkerMessage>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    sweeper_stop: Arc<AtomicBool>,
    started_at: AtomicI64,
}

impl MatchingDispatcher {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let (ready_tx, ready_rx) = unbounded();
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state: AtomicU8::new(STATE_CREATED),
                books: DashMap::new(),
                order_index: DashMap::new(),
                ready_tx,
                clock: AtomicI64::new(0),
                admission_seq: AtomicU64::new(0),
                orders_accepted: AtomicU64::new(0),
                trades_executed: AtomicU64::new(0),
                volume: Mutex::new(Decimal::ZERO),
                bus: EventBus::new(),
                authorizer: RwLock::new(None),
                risk_gate: RwLock::new(Arc::new(AcceptAllRisk)),
            }),
            ready_rx,
            workers: Mutex::new(Vec::new()),
            sweeper: Mutex::new(None),
            sweeper_stop: Arc::new(AtomicBool::new(false)),
            started_at: AtomicI64::new(0),
        })
    }

    // ── Collaborators and subscriptions ─────────────────────────────

    pub fn set_authorizer(&self, authorizer: Arc<dyn Authorizer>) {
        *self
            .shared
            .authorizer
            .write()
            .expect("authorizer lock poisoned") = Some(authorizer);
    }

    pub fn set_risk_gate(&self, gate: Arc<dyn RiskGate>) {
        *self
            .shared
            .risk_gate
            .write()
            .expect("risk gate lock poisoned") = gate;
    }

    pub fn set_trade_sink(&self, sink: Arc<dyn TradeSink>) {
        self.shared.bus.set_trade_sink(sink);
    }

    pub fn subscribe_trades(&self, subscriber: Arc<dyn TradeSubscriber>) {
        self.shared.bus.subscribe_trades(subscriber);
    }

    pub fn subscribe_market_data(&self, subscriber: Arc<dyn MarketDataSubscriber>) {
        self.shared.bus.subscribe_market_data(subscriber);
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Start workers, the expiry sweeper, and the bus. Idempotent while
    /// running; a stopped dispatcher stays stopped.
    pub fn start(&self) {
        match self.shared.state.compare_exchange(
            STATE_CREATED,
            STATE_RUNNING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(STATE_RUNNING) => return,
            Err(state) => {
                warn!(state, "start ignored: dispatcher already stopped");
                return;
            }
        }

        self.started_at.store(now_micros(), Ordering::SeqCst);
        self.shared.bus.start();

        let mut workers = self.workers.lock().expect("workers lock poisoned");
        for _ in 0..self.shared.config.worker_count {
            let shared = Arc::clone(&self.shared);
            let ready_rx = self.ready_rx.clone();
            workers.push(std::thread::spawn(move || worker_loop(shared, ready_rx)));
        }

        if self.shared.config.order_timeout_secs > 0 {
            let shared = Arc::clone(&self.shared);
            let stop_flag = Arc::clone(&self.sweeper_stop);
            *self.sweeper.lock().expect("sweeper lock poisoned") =
                Some(std::thread::spawn(move || sweeper_loop(shared, stop_flag)));
        }

        info!(
            workers = self.shared.config.worker_count,
            timeout_secs = self.shared.config.order_timeout_secs,
            "matching dispatcher started"
        );
    }

    /// Drain every accepted request to completion, halt the sweeper and the
    /// bus, then transition to stopped.
    pub fn stop(&self) {
        match self.shared.state.compare_exchange(
            STATE_RUNNING,
            STATE_DRAINING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(STATE_CREATED) => {
                self.shared.state.store(STATE_STOPPED, Ordering::SeqCst);
                return;
            }
            Err(_) => return,
        }

        // Already-accepted requests are never rejected: wait for every lane
        // to fall idle.
        loop {
            let busy = self.shared.books.iter().any(|entry| !entry.value().idle());
            if !busy {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let mut workers = self.workers.lock().expect("workers lock poisoned");
        for _ in workers.iter() {
            let _ = self.shared.ready_tx.send(WorkerMessage::Shutdown);
        }
        for handle in workers.drain(..) {
            let _ = handle.join();
        }

        self.sweeper_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sweeper.lock().expect("sweeper lock poisoned").take() {
            let _ = handle.join();
        }

        self.shared.bus.stop();
        self.shared.state.store(STATE_STOPPED, Ordering::SeqCst);
        info!("matching dispatcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.load(Ordering::SeqCst) == STATE_RUNNING
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(EngineError::NotRunning)
        }
    }

    // ── Requests ────────────────────────────────────────────────────

    pub fn submit(&self, request: SubmitOrder) -> SubmitResponse {
        self.submit_with_priority(request, 0)
    }

    /// Submit with an admission priority. Priority orders requests within
    /// one symbol; across symbols it is not comparable.
    pub fn submit_with_priority(&self, request: SubmitOrder, priority: i32) -> SubmitResponse {
        let order_id = request.id.clone();
        match self.admit_submit(request, priority) {
            Ok(reply) => match reply.recv() {
                Ok(EngineResponse::Submit(response)) => response,
                _ => SubmitResponse {
                    accepted: false,
                    order_id,
                    trades: Vec::new(),
                    error: Some(EngineError::Internal("worker reply lost".to_string())),
                },
            },
            Err(error) => SubmitResponse {
                accepted: false,
                order_id,
                trades: Vec::new(),
                error: Some(error),
            },
        }
    }

    /// Submit a batch: all requests are admitted before any reply is
    /// awaited, so distinct symbols execute in parallel.
    pub fn submit_batch(&self, requests: Vec<SubmitOrder>) -> Vec<SubmitResponse> {
        let admitted: Vec<(String, Result<mpsc::Receiver<EngineResponse>, EngineError>)> =
            requests
                .into_iter()
                .map(|request| {
                    let id = request.id.clone();
                    (id, self.admit_submit(request, 0))
                })
                .collect();

        admitted
            .into_iter()
            .map(|(order_id, admitted)| match admitted {
                Ok(reply) => match reply.recv() {
                    Ok(EngineResponse::Submit(response)) => response,
                    _ => SubmitResponse {
                        accepted: false,
                        order_id,
                        trades: Vec::new(),
                        error: Some(EngineError::Internal("worker reply lost".to_string())),
                    },
                },
                Err(error) => SubmitResponse {
                    accepted: false,
                    order_id,
                    trades: Vec::new(),
                    error: Some(error),
                },
            })
            .collect()
    }

    pub fn cancel(&self, request: CancelOrder) -> CancelResponse {
        self.cancel_with_priority(request, 0)
    }

    pub fn cancel_with_priority(&self, request: CancelOrder, priority: i32) -> CancelResponse {
        match self.admit_cancel(request, priority) {
            Ok(reply) => match reply.recv() {
                Ok(EngineResponse::Cancel(response)) => response,
                _ => CancelResponse {
                    accepted: false,
                    error: Some(EngineError::Internal("worker reply lost".to_string())),
                },
            },
            Err(error) => CancelResponse {
                accepted: false,
                error: Some(error),
            },
        }
    }

    pub fn modify(&self, request: ModifyOrder) -> ModifyResponse {
        self.modify_with_priority(request, 0)
    }

    pub fn modify_with_priority(&self, request: ModifyOrder, priority: i32) -> ModifyResponse {
        match self.admit_modify(request, priority) {
            Ok(reply) => match reply.recv() {
                Ok(EngineResponse::Modify(response)) => response,
                _ => ModifyResponse {
                    accepted: false,
                    trades: Vec::new(),
                    error: Some(EngineError::Internal("worker reply lost".to_string())),
                },
            },
            Err(error) => ModifyResponse {
                accepted: false,
                trades: Vec::new(),
                error: Some(error),
            },
        }
    }

    fn admit_submit(
        &self,
        request: SubmitOrder,
        priority: i32,
    ) -> Result<mpsc::Receiver<EngineResponse>, EngineError> {
        self.ensure_running()?;

        let id = OrderId::try_new(request.id)
            .ok_or_else(|| EngineError::Validation("order id cannot be empty".to_string()))?;
        let owner = UserId::try_new(request.owner)
            .ok_or_else(|| EngineError::Validation("owner cannot be empty".to_string()))?;
        let symbol = Symbol::try_new(request.symbol)
            .ok_or_else(|| EngineError::Validation("symbol cannot be empty".to_string()))?;
        let quantity = Quantity::try_new(request.qty)
            .ok_or_else(|| EngineError::Validation("quantity must be positive".to_string()))?;

        let price = match request.order_type {
            OrderType::Limit => {
                let raw = request.price.ok_or_else(|| {
                    EngineError::Validation("limit order requires a price".to_string())
                })?;
                Some(Price::try_new(raw).ok_or_else(|| {
                    EngineError::Validation("limit price must be positive".to_string())
                })?)
            }
            _ => None,
        };
        let trigger = match request.order_type {
            OrderType::StopLoss => {
                if !self.shared.config.enable_stop_loss {
                    return Err(EngineError::Validation(
                        "stop-loss orders are disabled".to_string(),
                    ));
                }
                let raw = request.trigger.ok_or_else(|| {
                    EngineError::Validation("stop-loss order requires a trigger price".to_string())
                })?;
                Some(Price::try_new(raw).ok_or_else(|| {
                    EngineError::Validation("trigger price must be positive".to_string())
                })?)
            }
            _ => None,
        };

        let created_at = self.shared.next_timestamp();
        let order = Order::new(
            id.clone(),
            owner,
            symbol.clone(),
            request.order_type,
            request.side,
            price,
            quantity,
            trigger,
            created_at,
        )?;

        // Pre-trade risk admission, synchronous and before routing: a
        // rejected order must not leave a freshly created book behind, so
        // the lane is only materialized after the gate passes. Unregistered
        // symbols are judged against an empty book.
        let existing = self
            .shared
            .books
            .get(&symbol)
            .map(|entry| Arc::clone(entry.value()));
        if existing.is_none() && !self.shared.config.auto_create_symbols {
            return Err(EngineError::UnknownSymbol(symbol.to_string()));
        }
        let stats = match &existing {
            Some(lane) => lane.book.lock().expect("book lock poisoned").stats(),
            None => {
                OrderBook::new(symbol.clone(), self.shared.config.max_trigger_depth).stats()
            }
        };
        let gate = self
            .shared
            .risk_gate
            .read()
            .expect("risk gate lock poisoned")
            .clone();
        gate.admit(&order, &stats)
            .map_err(EngineError::RiskRejected)?;

        let lane = match existing {
            Some(lane) => lane,
            None => self.lane_for(&symbol, true)?,
        };

        // Ids must be unique among live orders, engine-wide.
        match self.shared.order_index.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EngineError::Validation(format!(
                    "duplicate order id {}",
                    id
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(symbol);
            }
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        match self.enqueue(&lane, Payload::Submit(order), priority, reply_tx) {
            Ok(()) => {
                self.shared.orders_accepted.fetch_add(1, Ordering::SeqCst);
                Ok(reply_rx)
            }
            Err(error) => {
                self.shared.order_index.remove(&id);
                Err(error)
            }
        }
    }

    fn admit_cancel(
        &self,
        request: CancelOrder,
        priority: i32,
    ) -> Result<mpsc::Receiver<EngineResponse>, EngineError> {
        self.ensure_running()?;
        let id = OrderId::try_new(request.id)
            .ok_or_else(|| EngineError::Validation("order id cannot be empty".to_string()))?;
        let owner = UserId::try_new(request.owner)
            .ok_or_else(|| EngineError::Validation("owner cannot be empty".to_string()))?;

        let symbol = self
            .shared
            .order_index
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::UnknownOrder(id.to_string()))?;
        let lane = self.lane_for(&symbol, false)?;

        let (reply_tx, reply_rx) = mpsc::channel();
        self.enqueue(&lane, Payload::Cancel { id, owner }, priority, reply_tx)?;
        Ok(reply_rx)
    }

    fn admit_modify(
        &self,
        request: ModifyOrder,
        priority: i32,
    ) -> Result<mpsc::Receiver<EngineResponse>, EngineError> {
        self.ensure_running()?;
        let id = OrderId::try_new(request.id)
            .ok_or_else(|| EngineError::Validation("order id cannot be empty".to_string()))?;
        let owner = UserId::try_new(request.owner)
            .ok_or_else(|| EngineError::Validation("owner cannot be empty".to_string()))?;
        let new_price = match request.new_price {
            Some(raw) => Some(Price::try_new(raw).ok_or_else(|| {
                EngineError::Validation("new price must be positive".to_string())
            })?),
            None => None,
        };
        let new_quantity = match request.new_qty {
            Some(raw) => Some(Quantity::try_new(raw).ok_or_else(|| {
                EngineError::Validation("new quantity must be positive".to_string())
            })?),
            None => None,
        };

        let symbol = self
            .shared
            .order_index
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::UnknownOrder(id.to_string()))?;
        let lane = self.lane_for(&symbol, false)?;

        let (reply_tx, reply_rx) = mpsc::channel();
        self.enqueue(
            &lane,
            Payload::Modify {
                id,
                owner,
                new_price,
                new_quantity,
            },
            priority,
            reply_tx,
        )?;
        Ok(reply_rx)
    }

    fn enqueue(
        &self,
        lane: &Arc<SymbolLane>,
        payload: Payload,
        priority: i32,
        reply: mpsc::Sender<EngineResponse>,
    ) -> Result<(), EngineError> {
        {
            let mut mailbox = lane.mailbox.lock().expect("mailbox lock poisoned");
            if mailbox.len() >= self.shared.config.max_queue_size {
                return Err(EngineError::Overloaded(lane.symbol.to_string()));
            }
            let seq = self.shared.admission_seq.fetch_add(1, Ordering::SeqCst);
            mailbox.push(QueuedRequest {
                priority,
                seq,
                payload,
                reply,
            });
        }
        if !lane.scheduled.swap(true, Ordering::SeqCst) {
            let _ = self
                .shared
                .ready_tx
                .send(WorkerMessage::Lane(Arc::clone(lane)));
        }
        Ok(())
    }

    fn lane_for(&self, symbol: &Symbol, create: bool) -> Result<Arc<SymbolLane>, EngineError> {
        if let Some(lane) = self.shared.books.get(symbol) {
            return Ok(Arc::clone(lane.value()));
        }
        if !create || !self.shared.config.auto_create_symbols {
            return Err(EngineError::UnknownSymbol(symbol.to_string()));
        }
        let lane = self
            .shared
            .books
            .entry(symbol.clone())
            .or_insert_with(|| {
                debug!(symbol = %symbol, "created order book");
                Arc::new(SymbolLane::new(
                    symbol.clone(),
                    self.shared.config.max_trigger_depth,
                ))
            })
            .clone();
        Ok(lane)
    }

    // ── Symbol management ───────────────────────────────────────────

    /// Register a symbol up front (regardless of the auto-create policy).
    pub fn add_symbol(&self, symbol: &str) -> Result<(), EngineError> {
        let symbol = Symbol::try_new(symbol)
            .ok_or_else(|| EngineError::Validation("symbol cannot be empty".to_string()))?;
        self.shared.books.entry(symbol.clone()).or_insert_with(|| {
            debug!(symbol = %symbol, "registered order book");
            Arc::new(SymbolLane::new(
                symbol.clone(),
                self.shared.config.max_trigger_depth,
            ))
        });
        Ok(())
    }

    /// Remove a symbol's book. Rejected while live orders remain.
    pub fn remove_symbol(&self, symbol: &str) -> Result<(), EngineError> {
        let symbol = Symbol::try_new(symbol)
            .ok_or_else(|| EngineError::Validation("symbol cannot be empty".to_string()))?;
        let Some(lane) = self
            .shared
            .books
            .get(&symbol)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return Err(EngineError::UnknownSymbol(symbol.to_string()));
        };

        let book = lane.book.lock().expect("book lock poisoned");
        if !book.is_empty() || !lane.idle() {
            return Err(EngineError::SymbolNotEmpty(symbol.to_string()));
        }
        drop(book);

        self.shared.books.remove(&symbol);
        debug!(symbol = %symbol, "removed order book");
        Ok(())
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .shared
            .books
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        symbols.sort();
        symbols
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        let id = OrderId::try_new(order_id)?;
        let symbol = self.shared.order_index.get(&id)?.value().clone();
        let lane = self.shared.books.get(&symbol)?.value().clone();
        let book = lane.book.lock().expect("book lock poisoned");
        book.get_order(&id).cloned()
    }

    /// Every live order for one owner, across all symbols.
    pub fn user_orders(&self, owner: &str) -> Vec<Order> {
        let Some(owner) = UserId::try_new(owner) else {
            return Vec::new();
        };
        let mut lanes: Vec<Arc<SymbolLane>> = self
            .shared
            .books
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        lanes.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let mut orders = Vec::new();
        for lane in lanes {
            let book = lane.book.lock().expect("book lock poisoned");
            orders.extend(book.user_orders(&owner).into_iter().cloned());
        }
        orders
    }

    pub fn book_stats(&self, symbol: &str) -> Option<BookStats> {
        let symbol = Symbol::try_new(symbol)?;
        let lane = self.shared.books.get(&symbol)?.value().clone();
        let book = lane.book.lock().expect("book lock poisoned");
        Some(book.stats())
    }

    pub fn market_data(&self, symbol: &str) -> Option<MarketDataUpdate> {
        let stats = self.book_stats(symbol)?;
        Some(self.shared.market_data_from_stats(&stats))
    }

    pub fn all_market_data(&self) -> Vec<MarketDataUpdate> {
        self.symbols()
            .iter()
            .filter_map(|symbol| self.market_data(symbol.as_str()))
            .collect()
    }

    pub fn depth(&self, symbol: &str, levels: usize) -> Option<DepthView> {
        let symbol = Symbol::try_new(symbol)?;
        let lane = self.shared.books.get(&symbol)?.value().clone();
        let book = lane.book.lock().expect("book lock poisoned");
        Some(DepthView {
            symbol: symbol.clone(),
            bids: book.depth(Side::Buy, levels),
            asks: book.depth(Side::Sell, levels),
        })
    }

    pub fn multi_symbol_depth(&self, symbols: &[&str], levels: usize) -> Vec<DepthView> {
        symbols
            .iter()
            .filter_map(|symbol| self.depth(symbol, levels))
            .collect()
    }

    pub fn stats(&self) -> EngineStats {
        let started = self.started_at.load(Ordering::SeqCst);
        let uptime_secs = if started > 0 {
            ((now_micros() - started).max(0) / 1_000_000) as u64
        } else {
            0
        };
        EngineStats {
            orders_accepted: self.shared.orders_accepted.load(Ordering::SeqCst),
            trades_executed: self.shared.trades_executed.load(Ordering::SeqCst),
            volume_traded: *self.shared.volume.lock().expect("volume lock poisoned"),
            active_symbols: self.shared.books.len(),
            uptime_secs,
            running: self.is_running(),
        }
    }

    // ── Snapshot export/import ──────────────────────────────────────

    /// Serialize every book, sorted by symbol for determinism.
    pub fn export_snapshot(&self) -> EngineSnapshot {
        let mut lanes: Vec<Arc<SymbolLane>> = self
            .shared
            .books
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        lanes.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let books = lanes
            .iter()
            .map(|lane| lane.book.lock().expect("book lock poisoned").snapshot())
            .collect();
        EngineSnapshot {
            created_at: self.shared.next_timestamp(),
            books,
        }
    }

    /// Load books from a snapshot. Allowed only before `start`; recovery is
    /// a fresh dispatcher plus an import.
    pub fn import_snapshot(&self, snapshot: EngineSnapshot) -> Result<(), EngineError> {
        if self.shared.state.load(Ordering::SeqCst) != STATE_CREATED {
            return Err(EngineError::Validation(
                "snapshot import requires a freshly created dispatcher".to_string(),
            ));
        }

        self.shared.books.clear();
        self.shared.order_index.clear();

        for book_snapshot in snapshot.books {
            let book = OrderBook::from_snapshot(
                book_snapshot,
                self.shared.config.max_trigger_depth,
            )
            .map_err(|err| EngineError::Validation(err.to_string()))?;
            let symbol = book.symbol().clone();

            for id in book
                .resting_order_ids(Side::Buy)
                .into_iter()
                .chain(book.resting_order_ids(Side::Sell))
                .chain(book.stop_order_ids())
            {
                self.shared.order_index.insert(id, symbol.clone());
            }

            let lane = Arc::new(SymbolLane::new(
                symbol.clone(),
                self.shared.config.max_trigger_depth,
            ));
            *lane.book.lock().expect("book lock poisoned") = book;
            self.shared.books.insert(symbol, lane);
        }

        info!(books = self.shared.books.len(), "snapshot imported");
        Ok(())
    }
}

impl Drop for MatchingDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Worker and sweeper loops ────────────────────────────────────────

fn worker_loop(shared: Arc<Shared>, ready_rx: Receiver<WorkerMessage>) {
    while let Ok(message) = ready_rx.recv() {
        let lane = match message {
            WorkerMessage::Lane(lane) => lane,
            WorkerMessage::Shutdown => break,
        };
        loop {
            let next = lane.mailbox.lock().expect("mailbox lock poisoned").pop();
            match next {
                Some(request) => process(&shared, &lane, request),
                None => {
                    lane.scheduled.store(false, Ordering::SeqCst);
                    // Re-check: a producer may have enqueued between the
                    // empty pop and the flag reset without re-scheduling.
                    let refill = !lane
                        .mailbox
                        .lock()
                        .expect("mailbox lock poisoned")
                        .is_empty();
                    if refill && !lane.scheduled.swap(true, Ordering::SeqCst) {
                        continue;
                    }
                    break;
                }
            }
        }
    }
}

fn process(shared: &Arc<Shared>, lane: &Arc<SymbolLane>, request: QueuedRequest) {
    let mut book = lane.book.lock().expect("book lock poisoned");
    let top_before = book.top_of_book();

    let response = match request.payload {
        Payload::Submit(order) => {
            let order_id = order.id.to_string();
            let outcome = book.submit(order);
            for retired in &outcome.retired {
                shared.order_index.remove(retired);
            }
            shared.publish_trades_and_counters(&outcome.trades);
            EngineResponse::Submit(SubmitResponse {
                accepted: outcome.accepted(),
                order_id,
                trades: outcome.trades,
                error: outcome.error,
            })
        }
        Payload::Cancel { id, owner } => {
            let ownership = book.get_order(&id).map(|order| shared.owns(order, &owner));
            let response = match ownership {
                None => CancelResponse {
                    accepted: false,
                    error: Some(EngineError::UnknownOrder(id.to_string())),
                },
                Some(false) => CancelResponse {
                    accepted: false,
                    error: Some(EngineError::NotOwner {
                        owner: owner.to_string(),
                        order_id: id.to_string(),
                    }),
                },
                Some(true) => {
                    if book.cancel(&id) {
                        shared.order_index.remove(&id);
                        CancelResponse {
                            accepted: true,
                            error: None,
                        }
                    } else {
                        CancelResponse {
                            accepted: false,
                            error: Some(EngineError::UnknownOrder(id.to_string())),
                        }
                    }
                }
            };
            EngineResponse::Cancel(response)
        }
        Payload::Modify {
            id,
            owner,
            new_price,
            new_quantity,
        } => {
            let ownership = book.get_order(&id).map(|order| shared.owns(order, &owner));
            let response = match ownership {
                None => ModifyResponse {
                    accepted: false,
                    trades: Vec::new(),
                    error: Some(EngineError::UnknownOrder(id.to_string())),
                },
                Some(false) => ModifyResponse {
                    accepted: false,
                    trades: Vec::new(),
                    error: Some(EngineError::NotOwner {
                        owner: owner.to_string(),
                        order_id: id.to_string(),
                    }),
                },
                Some(true) => {
                    let now = shared.next_timestamp();
                    let outcome = book.modify(&id, new_price, new_quantity, now);
                    for retired in &outcome.retired {
                        shared.order_index.remove(retired);
                    }
                    shared.publish_trades_and_counters(&outcome.trades);
                    ModifyResponse {
                        accepted: outcome.accepted(),
                        trades: outcome.trades,
                        error: outcome.error,
                    }
                }
            };
            EngineResponse::Modify(response)
        }
    };

    if shared.config.enable_market_data {
        let top_after = book.top_of_book();
        if top_after != top_before {
            let update = shared.market_data_from_stats(&book.stats());
            shared.bus.publish_top_of_book(update);
        }
    }
    drop(book);

    let _ = request.reply.send(response);
}

fn sweeper_loop(shared: Arc<Shared>, stop_flag: Arc<AtomicBool>) {
    let timeout_micros = shared.config.order_timeout_secs as i64 * 1_000_000;
    while !stop_flag.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }

        let cutoff = now_micros() - timeout_micros;
        let lanes: Vec<Arc<SymbolLane>> = shared
            .books
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for lane in lanes {
            let mut book = lane.book.lock().expect("book lock poisoned");
            let top_before = book.top_of_book();
            let expired = book.expire_before(cutoff);
            if expired.is_empty() {
                continue;
            }
            for order in &expired {
                shared.order_index.remove(&order.id);
            }
            info!(
                symbol = %lane.symbol,
                count = expired.len(),
                "expiry sweep cancelled stale orders"
            );
            if shared.config.enable_market_data && book.top_of_book() != top_before {
                let update = shared.market_data_from_stats(&book.stats());
                shared.bus.publish_top_of_book(update);
            }
        }
    }
}
