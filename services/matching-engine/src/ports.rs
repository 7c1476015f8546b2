//! Collaborator ports
//!
//! Narrow capability interfaces through which the core consults its
//! external collaborators: ownership checks for cancel/modify, pre-trade
//! risk admission, and a write-behind trade sink. Each has a stub
//! implementation so the core runs standalone.

use types::errors::EngineError;
use types::ids::{OrderId, UserId};
use types::order::Order;
use types::trade::Trade;

use crate::book::BookStats;

/// Ownership authority for cancel/modify requests.
///
/// When no authorizer is installed the core falls back to comparing the
/// request's owner with the order's own owner field.
pub trait Authorizer: Send + Sync {
    fn owns(&self, owner: &UserId, order_id: &OrderId) -> bool;
}

/// Pre-trade admission control, consulted synchronously before routing.
pub trait RiskGate: Send + Sync {
    fn admit(&self, order: &Order, book: &BookStats) -> Result<(), String>;
}

/// Accepts every order; the default risk gate.
#[derive(Debug, Default)]
pub struct AcceptAllRisk;

impl RiskGate for AcceptAllRisk {
    fn admit(&self, _order: &Order, _book: &BookStats) -> Result<(), String> {
        Ok(())
    }
}

/// Write-behind sink for executed trades.
///
/// Called from the bus thread, never from the matching path; failures are
/// logged and must not block matching.
pub trait TradeSink: Send + Sync {
    fn record(&self, trade: &Trade) -> Result<(), EngineError>;
}
