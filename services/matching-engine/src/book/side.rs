//! One side of an order book
//!
//! Price levels in a BTreeMap for deterministic iteration; best price is the
//! maximum key for bids and the minimum key for asks. Empty levels are
//! removed immediately so the best price is always live.

use std::collections::BTreeMap;
use types::ids::OrderId;
use types::numeric::{Price, Quantity};
use types::order::Side;

use super::price_level::PriceLevel;

/// One (price, aggregate) entry of a depth snapshot.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DepthLevel {
    pub price: Price,
    pub quantity: Quantity,
    pub orders: usize,
}

/// Price-ordered half of an order book.
#[derive(Debug, Clone)]
pub struct BookSide {
    side: Side,
    levels: BTreeMap<Price, PriceLevel>,
    /// Live orders resting on this side.
    order_count: usize,
}

impl BookSide {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            order_count: 0,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Best price: highest bid or lowest ask.
    pub fn best_price(&self) -> Option<Price> {
        match self.side {
            Side::Buy => self.levels.keys().next_back().copied(),
            Side::Sell => self.levels.keys().next().copied(),
        }
    }

    /// Aggregate quantity at the best price.
    pub fn best_quantity(&self) -> Option<Quantity> {
        self.best_level().map(|level| level.total_quantity())
    }

    fn best_level(&self) -> Option<&PriceLevel> {
        match self.side {
            Side::Buy => self.levels.values().next_back(),
            Side::Sell => self.levels.values().next(),
        }
    }

    /// Head (oldest) order at the given price.
    pub fn head_at(&self, price: Price) -> Option<OrderId> {
        self.levels.get(&price).and_then(|l| l.head().cloned())
    }

    /// Rest an order at its price level, at the back of the FIFO.
    pub fn insert(&mut self, price: Price, order_id: OrderId, remaining: Quantity) {
        self.levels
            .entry(price)
            .or_default()
            .push(order_id, remaining);
        self.order_count += 1;
    }

    /// Remove an order by id from its level; drops the level if it empties.
    pub fn remove(&mut self, price: Price, order_id: &OrderId, remaining: Quantity) -> bool {
        let Some(level) = self.levels.get_mut(&price) else {
            return false;
        };
        if !level.remove(order_id, remaining) {
            return false;
        }
        if level.is_empty() {
            self.levels.remove(&price);
        }
        self.order_count -= 1;
        true
    }

    /// Pop the head order at a price after it filled completely.
    pub fn pop_head(&mut self, price: Price) -> Option<OrderId> {
        let level = self.levels.get_mut(&price)?;
        // Remaining is zero once fills have been applied through reduce().
        let id = level.pop_head(Quantity::zero())?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        self.order_count -= 1;
        Some(id)
    }

    /// Shrink the aggregate at a price after a partial fill or an in-place
    /// quantity decrease.
    pub fn reduce_at(&mut self, price: Price, quantity: Quantity) {
        if let Some(level) = self.levels.get_mut(&price) {
            level.reduce(quantity);
        }
    }

    /// Top-n levels, best first.
    pub fn depth(&self, n: usize) -> Vec<DepthLevel> {
        let snapshot = |(price, level): (&Price, &PriceLevel)| DepthLevel {
            price: *price,
            quantity: level.total_quantity(),
            orders: level.order_count(),
        };
        match self.side {
            Side::Buy => self.levels.iter().rev().take(n).map(snapshot).collect(),
            Side::Sell => self.levels.iter().take(n).map(snapshot).collect(),
        }
    }

    /// All resting order ids in (price-priority, arrival) order.
    pub fn order_ids(&self) -> Vec<OrderId> {
        let levels: Box<dyn Iterator<Item = &PriceLevel> + '_> = match self.side {
            Side::Buy => Box::new(self.levels.values().rev()),
            Side::Sell => Box::new(self.levels.values()),
        };
        levels.flat_map(|l| l.iter().cloned()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn order_count(&self) -> usize {
        self.order_count
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}
