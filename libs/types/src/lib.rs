//! Shared domain types for the order-matching engine
//!
//! Identifier newtypes, fixed-point numerics, order and trade records, and
//! the engine error taxonomy. Everything here is pure data with validated
//! constructors; matching logic lives in the matching-engine crate.

pub mod errors;
pub mod ids;
pub mod numeric;
pub mod order;
pub mod trade;

pub use errors::EngineError;
pub use ids::{OrderId, Symbol, TradeId, UserId};
pub use numeric::{Price, Quantity};
pub use order::{CancelReason, Order, OrderStatus, OrderType, Side};
pub use trade::Trade;
