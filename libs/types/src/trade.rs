//! Trade execution records
//!
//! A trade is a value record emitted once per fill event and discarded by
//! the core; persistence is an external concern.

use crate::ids::{OrderId, Symbol, TradeId};
use crate::numeric::{Price, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An executed trade between a buy and a sell order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub symbol: Symbol,
    pub price: Price,
    pub quantity: Quantity,
    /// Execution timestamp in microseconds.
    pub executed_at: i64,
}

impl Trade {
    pub fn new(
        trade_id: TradeId,
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        symbol: Symbol,
        price: Price,
        quantity: Quantity,
        executed_at: i64,
    ) -> Self {
        Self {
            trade_id,
            buy_order_id,
            sell_order_id,
            symbol,
            price,
            quantity,
            executed_at,
        }
    }

    /// Notional value of the trade (price × quantity).
    pub fn trade_value(&self) -> Decimal {
        self.quantity * self.price
    }
}
