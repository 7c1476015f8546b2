//! Snapshot data model
//!
//! Plain serializable records describing the full book set: per symbol, the
//! live orders in (side, price-priority, arrival) order plus the stop
//! stores, the last trade price, and the counters. Decimal fields are
//! stored as strings so the records survive any serde backend without
//! precision loss.
//!
//! Restore rebuilds books deterministically and rejects any stream whose
//! invariants do not hold.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;
use types::ids::{OrderId, Symbol, UserId};
use types::numeric::{Price, Quantity};
use types::order::{Order, OrderStatus, OrderType, Side};

use crate::book::OrderBook;

/// Errors rejected by snapshot restore.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestoreError {
    #[error("unparseable {field}: {value}")]
    Parse { field: String, value: String },

    #[error("order {order_id} carries symbol {found}, book is {expected}")]
    SymbolMismatch {
        order_id: String,
        expected: String,
        found: String,
    },

    #[error("duplicate order id {0}")]
    DuplicateOrder(String),

    #[error("order {order_id} has non-live status {status}")]
    NotLive { order_id: String, status: String },

    #[error("order {0} violates filled + remaining = quantity")]
    QuantityInvariant(String),

    #[error("resting order {0} is not a limit order")]
    RestingNotLimit(String),

    #[error("stop record {0} is not an untriggered stop-loss order")]
    StopInvalid(String),

    #[error("restored book is crossed: bid {bid} >= ask {ask}")]
    CrossedBook { bid: String, ask: String },
}

/// One serialized order. Every identity and residual field is carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub owner: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    pub price: Option<String>,
    pub quantity: String,
    pub filled: String,
    pub remaining: String,
    pub status: String,
    pub created_at: i64,
    pub trigger: Option<String>,
}

impl OrderRecord {
    pub fn from_order(order: &Order) -> Self {
        let status = match order.status {
            OrderStatus::Pending => "PENDING",
            OrderStatus::PartialFill => "PARTIAL_FILL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled(_) => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Triggered => "TRIGGERED",
        };
        Self {
            order_id: order.id.to_string(),
            owner: order.owner.to_string(),
            symbol: order.symbol.to_string(),
            order_type: order.order_type,
            side: order.side,
            price: order.price.map(|p| p.to_string()),
            quantity: order.quantity.to_string(),
            filled: order.filled.to_string(),
            remaining: order.remaining.to_string(),
            status: status.to_string(),
            created_at: order.created_at,
            trigger: order.trigger.map(|t| t.to_string()),
        }
    }

    fn parse_decimal(field: &str, value: &str) -> Result<Decimal, RestoreError> {
        Decimal::from_str(value).map_err(|_| RestoreError::Parse {
            field: field.to_string(),
            value: value.to_string(),
        })
    }

    fn parse_price(field: &str, value: &str) -> Result<Price, RestoreError> {
        Price::try_new(Self::parse_decimal(field, value)?).ok_or_else(|| RestoreError::Parse {
            field: field.to_string(),
            value: value.to_string(),
        })
    }

    /// Rebuild a live order, enforcing the residual-state invariants.
    pub fn into_order(self) -> Result<Order, RestoreError> {
        let status = match self.status.as_str() {
            "PENDING" => OrderStatus::Pending,
            "PARTIAL_FILL" => OrderStatus::PartialFill,
            other => {
                return Err(RestoreError::NotLive {
                    order_id: self.order_id.clone(),
                    status: other.to_string(),
                })
            }
        };

        let id = OrderId::try_new(self.order_id.clone()).ok_or(RestoreError::Parse {
            field: "order_id".to_string(),
            value: self.order_id.clone(),
        })?;
        let owner = UserId::try_new(self.owner.clone()).ok_or(RestoreError::Parse {
            field: "owner".to_string(),
            value: self.owner.clone(),
        })?;
        let symbol = Symbol::try_new(self.symbol.clone()).ok_or(RestoreError::Parse {
            field: "symbol".to_string(),
            value: self.symbol.clone(),
        })?;

        let quantity = Quantity::try_new(Self::parse_decimal("quantity", &self.quantity)?)
            .ok_or_else(|| RestoreError::Parse {
                field: "quantity".to_string(),
                value: self.quantity.clone(),
            })?;
        let remaining = Quantity::try_new(Self::parse_decimal("remaining", &self.remaining)?)
            .ok_or_else(|| RestoreError::QuantityInvariant(self.order_id.clone()))?;
        let filled_dec = Self::parse_decimal("filled", &self.filled)?;
        if filled_dec < Decimal::ZERO
            || filled_dec + remaining.as_decimal() != quantity.as_decimal()
        {
            return Err(RestoreError::QuantityInvariant(self.order_id.clone()));
        }
        let filled = if filled_dec == Decimal::ZERO {
            Quantity::zero()
        } else {
            Quantity::new(filled_dec)
        };
        // Residual state and status must agree.
        if (status == OrderStatus::PartialFill) != !filled.is_zero() {
            return Err(RestoreError::QuantityInvariant(self.order_id.clone()));
        }

        let price = match self.price {
            Some(p) => Some(Self::parse_price("price", &p)?),
            None => None,
        };
        let trigger = match self.trigger {
            Some(t) => Some(Self::parse_price("trigger", &t)?),
            None => None,
        };

        Ok(Order {
            id,
            owner,
            symbol,
            order_type: self.order_type,
            side: self.side,
            price,
            quantity,
            filled,
            remaining,
            status,
            created_at: self.created_at,
            trigger,
        })
    }
}

/// Serialized state of one symbol's book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: String,
    pub last_trade_price: Option<String>,
    pub trade_count: u64,
    pub volume: String,
    pub trade_seq: u64,
    /// Resting orders in (side, price-priority, arrival) order.
    pub orders: Vec<OrderRecord>,
    /// Untriggered stop-loss orders in trigger-priority order.
    pub stops: Vec<OrderRecord>,
}

/// Serialized state of the whole engine: every book, sorted by symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Microsecond timestamp at which the snapshot was taken.
    pub created_at: i64,
    pub books: Vec<BookSnapshot>,
}

impl OrderBook {
    /// Serialize the book's live state.
    pub fn snapshot(&self) -> BookSnapshot {
        let stats = self.stats();
        let record = |id: &OrderId| self.get_order(id).map(OrderRecord::from_order);
        let bid_ids = self.resting_order_ids(Side::Buy);
        let ask_ids = self.resting_order_ids(Side::Sell);
        let orders: Vec<OrderRecord> = bid_ids
            .iter()
            .chain(ask_ids.iter())
            .filter_map(record)
            .collect();
        let stop_ids = self.stop_order_ids();
        let stops: Vec<OrderRecord> = stop_ids.iter().filter_map(record).collect();

        BookSnapshot {
            symbol: self.symbol().to_string(),
            last_trade_price: stats.last_trade_price.map(|p| p.to_string()),
            trade_count: stats.trade_count,
            volume: stats.volume.to_string(),
            trade_seq: self.trade_seq(),
            orders,
            stops,
        }
    }

    /// Rebuild a book from a snapshot, validating every invariant.
    pub fn from_snapshot(
        snapshot: BookSnapshot,
        max_trigger_depth: u32,
    ) -> Result<Self, RestoreError> {
        let symbol = Symbol::try_new(snapshot.symbol.clone()).ok_or(RestoreError::Parse {
            field: "symbol".to_string(),
            value: snapshot.symbol.clone(),
        })?;
        let last_trade_price = match snapshot.last_trade_price {
            Some(p) => Some(OrderRecord::parse_price("last_trade_price", &p)?),
            None => None,
        };
        let volume = OrderRecord::parse_decimal("volume", &snapshot.volume)?;

        let mut book = OrderBook::from_parts(
            symbol.clone(),
            last_trade_price,
            snapshot.trade_count,
            volume,
            snapshot.trade_seq,
            max_trigger_depth,
        );

        let mut seen: HashSet<OrderId> = HashSet::new();
        for record in snapshot.orders {
            let order = record.into_order()?;
            if order.symbol != symbol {
                return Err(RestoreError::SymbolMismatch {
                    order_id: order.id.to_string(),
                    expected: symbol.to_string(),
                    found: order.symbol.to_string(),
                });
            }
            // Only limit orders rest; markets never rest and stops are
            // invisible to matching.
            if !order.is_limit() || order.price.is_none() {
                return Err(RestoreError::RestingNotLimit(order.id.to_string()));
            }
            if !seen.insert(order.id.clone()) {
                return Err(RestoreError::DuplicateOrder(order.id.to_string()));
            }
            book.restore_resting(order);
        }

        for record in snapshot.stops {
            let order = record.into_order()?;
            if order.symbol != symbol {
                return Err(RestoreError::SymbolMismatch {
                    order_id: order.id.to_string(),
                    expected: symbol.to_string(),
                    found: order.symbol.to_string(),
                });
            }
            if !order.is_stop_loss() || order.trigger.is_none() || !order.filled.is_zero() {
                return Err(RestoreError::StopInvalid(order.id.to_string()));
            }
            if !seen.insert(order.id.clone()) {
                return Err(RestoreError::DuplicateOrder(order.id.to_string()));
            }
            book.restore_stop(order);
        }

        if let (Some(bid), Some(ask)) = book.top_of_book() {
            if bid >= ask {
                return Err(RestoreError::CrossedBook {
                    bid: bid.to_string(),
                    ask: ask.to_string(),
                });
            }
        }

        Ok(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::OrderId;

    fn limit(id: &str, side: Side, price: u64, qty: u64, ts: i64) -> Order {
        Order::new(
            OrderId::new(id),
            UserId::new("alice"),
            Symbol::new("AAPL"),
            OrderType::Limit,
            side,
            Some(Price::from_u64(price)),
            Quantity::from_u64(qty),
            None,
            ts,
        )
        .unwrap()
    }

    fn populated_book() -> OrderBook {
        let mut book = OrderBook::new(Symbol::new("AAPL"), 64);
        book.submit(limit("S-0", Side::Sell, 100, 10, 1));
        book.submit(limit("B-0", Side::Buy, 100, 10, 2));
        book.submit(limit("B-1", Side::Buy, 99, 20, 3));
        book.submit(limit("S-1", Side::Sell, 101, 15, 4));
        book.submit(
            Order::new(
                OrderId::new("St-1"),
                UserId::new("carol"),
                Symbol::new("AAPL"),
                OrderType::StopLoss,
                Side::Sell,
                None,
                Quantity::from_u64(5),
                Some(Price::from_u64(96)),
                5,
            )
            .unwrap(),
        );
        book
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_state() {
        let book = populated_book();
        let snapshot = book.snapshot();

        assert_eq!(snapshot.symbol, "AAPL");
        assert_eq!(snapshot.orders.len(), 2);
        assert_eq!(snapshot.stops.len(), 1);
        assert_eq!(snapshot.trade_count, 1);

        let restored = OrderBook::from_snapshot(snapshot, 64).unwrap();
        assert_eq!(restored.best_bid(), book.best_bid());
        assert_eq!(restored.best_ask(), book.best_ask());
        assert_eq!(restored.last_trade_price(), book.last_trade_price());
        assert_eq!(restored.live_order_count(), book.live_order_count());
        assert_eq!(restored.stats(), book.stats());
    }

    #[test]
    fn test_restore_preserves_time_priority() {
        let mut book = OrderBook::new(Symbol::new("AAPL"), 64);
        book.submit(limit("B-1", Side::Buy, 100, 10, 1));
        book.submit(limit("B-2", Side::Buy, 100, 10, 2));

        let mut restored = OrderBook::from_snapshot(book.snapshot(), 64).unwrap();
        let outcome = restored.submit(limit("S-1", Side::Sell, 100, 10, 3));
        assert_eq!(outcome.trades[0].buy_order_id, OrderId::new("B-1"));
    }

    #[test]
    fn test_restore_rejects_resting_market_order() {
        let mut snapshot = populated_book().snapshot();
        snapshot.orders[0].order_type = OrderType::Market;
        snapshot.orders[0].price = None;

        let err = OrderBook::from_snapshot(snapshot, 64).unwrap_err();
        assert!(matches!(err, RestoreError::RestingNotLimit(_)));
    }

    #[test]
    fn test_restore_rejects_duplicate_ids() {
        let mut snapshot = populated_book().snapshot();
        let duplicate = snapshot.orders[0].clone();
        snapshot.orders.push(duplicate);

        let err = OrderBook::from_snapshot(snapshot, 64).unwrap_err();
        assert!(matches!(err, RestoreError::DuplicateOrder(_)));
    }

    #[test]
    fn test_restore_rejects_quantity_invariant_break() {
        let mut snapshot = populated_book().snapshot();
        snapshot.orders[0].remaining = "999".to_string();

        let err = OrderBook::from_snapshot(snapshot, 64).unwrap_err();
        assert!(matches!(err, RestoreError::QuantityInvariant(_)));
    }

    #[test]
    fn test_restore_rejects_crossed_book() {
        let mut snapshot = populated_book().snapshot();
        // Force the bid above the ask.
        for record in &mut snapshot.orders {
            if record.side == Side::Buy {
                record.price = Some("102".to_string());
            }
        }

        let err = OrderBook::from_snapshot(snapshot, 64).unwrap_err();
        assert!(matches!(err, RestoreError::CrossedBook { .. }));
    }

    #[test]
    fn test_restore_rejects_terminal_status() {
        let mut snapshot = populated_book().snapshot();
        snapshot.orders[0].status = "FILLED".to_string();

        let err = OrderBook::from_snapshot(snapshot, 64).unwrap_err();
        assert!(matches!(err, RestoreError::NotLive { .. }));
    }

    #[test]
    fn test_restore_rejects_stop_without_trigger() {
        let mut snapshot = populated_book().snapshot();
        snapshot.stops[0].trigger = None;

        let err = OrderBook::from_snapshot(snapshot, 64).unwrap_err();
        assert!(matches!(err, RestoreError::StopInvalid(_)));
    }
}
