//! Multi-symbol limit order-matching engine
//!
//! Per-symbol order books under strict price-time priority, with limit,
//! market, and stop-loss order types; partial fills; and deterministic
//! trade generation. The dispatcher serializes requests per symbol while
//! distinct symbols match in parallel, and fans trades and top-of-book
//! updates out on a subscription bus.
//!
//! **Key invariants:**
//! - Price-time priority strictly enforced
//! - Deterministic matching (same accepted sequence → same trades)
//! - Book never crossed after a submit
//! - Untriggered stop-loss orders are invisible to matching

pub mod book;
pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod ports;
pub mod requests;
pub mod snapshot;

pub use book::{BookStats, DepthLevel, OrderBook, SubmitOutcome};
pub use bus::{EventBus, MarketDataSubscriber, MarketDataUpdate, TradeSubscriber};
pub use config::EngineConfig;
pub use dispatcher::{DepthView, EngineStats, MatchingDispatcher};
pub use ports::{AcceptAllRisk, Authorizer, RiskGate, TradeSink};
pub use requests::{
    CancelOrder, CancelResponse, ModifyOrder, ModifyResponse, OrderRequest, SubmitOrder,
    SubmitResponse,
};
pub use snapshot::{BookSnapshot, EngineSnapshot, OrderRecord, RestoreError};
