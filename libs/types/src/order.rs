//! Order lifecycle types
//!
//! An order has immutable identity fields (id, owner, symbol, side, type,
//! original quantity, arrival timestamp, trigger) and mutable residual state
//! (filled, remaining, status). Status is monotonic:
//! Pending → (PartialFill)* → Filled | Cancelled | Rejected, with stop-loss
//! orders passing through Triggered on their way to market conversion.

use crate::errors::EngineError;
use crate::ids::{OrderId, Symbol, UserId};
use crate::numeric::{Price, Quantity};
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Execute at the given price or better; residual rests on the book.
    Limit,
    /// Execute at the best available price; residual never rests.
    Market,
    /// Dormant until the last trade price crosses the trigger, then
    /// converted to a market order.
    StopLoss,
}

/// Why an order was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    UserRequested,
    /// Market order residual with no matchable opposite side.
    NoLiquidity,
    /// Resting order outlived the configured timeout.
    Expired,
    /// Order found in a degenerate state during matching and discarded.
    InvariantViolation,
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason")]
pub enum OrderStatus {
    #[serde(rename = "PENDING")]
    Pending,

    #[serde(rename = "PARTIAL_FILL")]
    PartialFill,

    #[serde(rename = "FILLED")]
    Filled,

    #[serde(rename = "CANCELLED")]
    Cancelled(CancelReason),

    #[serde(rename = "REJECTED")]
    Rejected,

    /// Stop-loss crossed its trigger; about to re-enter as a market order.
    #[serde(rename = "TRIGGERED")]
    Triggered,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled(_) | OrderStatus::Rejected
        )
    }
}

/// A trading order.
///
/// `price` is `Some` only for limit orders; market and stop-loss orders
/// execute at the best available price. `trigger` is `Some` only for
/// stop-loss orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: UserId,
    pub symbol: Symbol,
    pub order_type: OrderType,
    pub side: Side,
    pub price: Option<Price>,
    pub quantity: Quantity,
    pub filled: Quantity,
    pub remaining: Quantity,
    pub status: OrderStatus,
    /// Arrival timestamp in microseconds; ties the order into time priority.
    pub created_at: i64,
    pub trigger: Option<Price>,
}

impl Order {
    /// Create a new pending order, validating type-dependent fields.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OrderId,
        owner: UserId,
        symbol: Symbol,
        order_type: OrderType,
        side: Side,
        price: Option<Price>,
        quantity: Quantity,
        trigger: Option<Price>,
        created_at: i64,
    ) -> Result<Self, EngineError> {
        match order_type {
            OrderType::Limit => {
                if price.is_none() {
                    return Err(EngineError::Validation(
                        "limit order requires a price".to_string(),
                    ));
                }
                if trigger.is_some() {
                    return Err(EngineError::Validation(
                        "trigger price is only valid on stop-loss orders".to_string(),
                    ));
                }
            }
            OrderType::Market => {
                if trigger.is_some() {
                    return Err(EngineError::Validation(
                        "trigger price is only valid on stop-loss orders".to_string(),
                    ));
                }
            }
            OrderType::StopLoss => {
                if trigger.is_none() {
                    return Err(EngineError::Validation(
                        "stop-loss order requires a trigger price".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            id,
            owner,
            symbol,
            order_type,
            side,
            // Market and stop-loss orders execute at the best price;
            // any submitted price is ignored.
            price: if order_type == OrderType::Limit {
                price
            } else {
                None
            },
            quantity,
            filled: Quantity::zero(),
            remaining: quantity,
            status: OrderStatus::Pending,
            created_at,
            trigger: if order_type == OrderType::StopLoss {
                trigger
            } else {
                None
            },
        })
    }

    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.side == Side::Sell
    }

    pub fn is_limit(&self) -> bool {
        self.order_type == OrderType::Limit
    }

    pub fn is_market(&self) -> bool {
        self.order_type == OrderType::Market
    }

    pub fn is_stop_loss(&self) -> bool {
        self.order_type == OrderType::StopLoss
    }

    /// Check if the order can still match or be cancelled
    pub fn is_live(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::PartialFill)
    }

    /// Consume part of the remaining quantity after a match.
    ///
    /// # Panics
    /// Panics if the fill is zero or exceeds the remaining quantity.
    pub fn fill(&mut self, quantity: Quantity) {
        assert!(!quantity.is_zero(), "Fill quantity must be positive");
        assert!(
            quantity <= self.remaining,
            "Fill would exceed remaining quantity"
        );

        self.filled = self.filled + quantity;
        self.remaining = self.remaining - quantity;

        self.status = if self.remaining.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartialFill
        };
    }

    /// Cancel the order.
    ///
    /// # Panics
    /// Panics if the order is already terminal.
    pub fn cancel(&mut self, reason: CancelReason) {
        assert!(!self.status.is_terminal(), "Cannot cancel terminal order");
        self.status = OrderStatus::Cancelled(reason);
    }

    /// Reject the order (validation failure or aborted trigger cascade).
    pub fn reject(&mut self) {
        self.status = OrderStatus::Rejected;
    }

    /// Mark a stop-loss order as triggered.
    ///
    /// # Panics
    /// Panics if the order is not a live stop-loss.
    pub fn mark_triggered(&mut self) {
        assert!(
            self.is_stop_loss() && self.is_live(),
            "Only live stop-loss orders can trigger"
        );
        self.status = OrderStatus::Triggered;
    }

    /// Convert a triggered stop-loss into its market-order incarnation,
    /// keeping id, owner, symbol, side, remaining quantity, and arrival
    /// timestamp.
    pub fn into_market(self) -> Order {
        assert!(
            self.status == OrderStatus::Triggered,
            "Only triggered orders convert to market"
        );
        Order {
            order_type: OrderType::Market,
            price: None,
            trigger: None,
            quantity: self.remaining,
            filled: Quantity::zero(),
            remaining: self.remaining,
            status: OrderStatus::Pending,
            ..self
        }
    }

    /// Check whether two orders can trade against each other.
    ///
    /// Compatible iff same symbol, opposite sides, both live with remaining
    /// quantity, and either side is a market order or the buy limit crosses
    /// the sell limit.
    pub fn compatible_with(&self, other: &Order) -> bool {
        if self.symbol != other.symbol {
            return false;
        }
        if self.side == other.side {
            return false;
        }
        if !self.is_live() || !other.is_live() {
            return false;
        }
        if self.remaining.is_zero() || other.remaining.is_zero() {
            return false;
        }

        let (buy, sell) = if self.is_buy() {
            (self, other)
        } else {
            (other, self)
        };
        match (buy.price, sell.price) {
            (Some(bid), Some(ask)) => bid >= ask,
            // A missing price means a market order: crosses anything.
            _ => true,
        }
    }
}
