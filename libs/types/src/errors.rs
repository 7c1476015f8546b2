//! Error taxonomy for the matching engine
//!
//! Every kind is reported back to the caller; none are retried by the core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the engine core.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineError {
    /// Malformed request; rejected before any state change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Symbol not registered and auto-create disabled.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Cancel or modify referenced no live order.
    #[error("unknown order: {0}")]
    UnknownOrder(String),

    /// Authorization denied for cancel/modify.
    #[error("user {owner} does not own order {order_id}")]
    NotOwner { owner: String, order_id: String },

    /// Per-symbol mailbox is full.
    #[error("mailbox for symbol {0} is full")]
    Overloaded(String),

    /// Market order found no matchable opposite side; residual cancelled.
    #[error("no liquidity for market order {0}")]
    NoLiquidity(String),

    /// Market-against-market with no last trade price to reference.
    #[error("no reference price for market-to-market execution")]
    NoReferencePrice,

    /// Stop-loss trigger chain exceeded the configured depth.
    #[error("stop-loss trigger cascade exceeded depth {0}")]
    TriggerCascade(u32),

    /// Request arrived before start or after stop.
    #[error("engine is not running")]
    NotRunning,

    /// Pre-trade risk gate declined the order.
    #[error("risk check rejected order: {0}")]
    RiskRejected(String),

    /// Symbol removal refused while live orders remain.
    #[error("symbol {0} still has live orders")]
    SymbolNotEmpty(String),

    /// Internal failure (worker died, channel closed).
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this error rejects the request outright.
    ///
    /// `NoLiquidity` and `TriggerCascade` are advisory: the request was
    /// accepted and (partially) executed, the error describes the residual.
    pub fn is_reject(&self) -> bool {
        !matches!(
            self,
            EngineError::NoLiquidity(_) | EngineError::TriggerCascade(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::UnknownSymbol("AAPL".to_string());
        assert_eq!(err.to_string(), "unknown symbol: AAPL");

        let err = EngineError::NotOwner {
            owner: "bob".to_string(),
            order_id: "O-1".to_string(),
        };
        assert!(err.to_string().contains("bob"));
        assert!(err.to_string().contains("O-1"));
    }

    #[test]
    fn test_reject_partition() {
        assert!(EngineError::Validation("empty id".into()).is_reject());
        assert!(EngineError::NoReferencePrice.is_reject());
        assert!(EngineError::NotRunning.is_reject());
        assert!(!EngineError::NoLiquidity("O-1".into()).is_reject());
        assert!(!EngineError::TriggerCascade(64).is_reject());
    }
}
