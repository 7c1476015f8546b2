//! Price level with FIFO queue
//!
//! A price level holds all resting orders at one exact price, in arrival
//! order. The level stores order-id handles only; the orders themselves live
//! in the book's id-indexed arena, so the level tracks its aggregate
//! quantity through explicit adjustments from the book.

use std::collections::VecDeque;
use types::ids::OrderId;
use types::numeric::Quantity;

/// All orders queued at one price, oldest first.
#[derive(Debug, Clone)]
pub struct PriceLevel {
    /// Order handles in arrival order (FIFO).
    queue: VecDeque<OrderId>,
    /// Cached sum of the remaining quantities of the queued orders.
    total_quantity: Quantity,
}

impl PriceLevel {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            total_quantity: Quantity::zero(),
        }
    }

    /// Append an order at the back of the queue (loses to everything
    /// already resting here).
    pub fn push(&mut self, order_id: OrderId, remaining: Quantity) {
        self.queue.push_back(order_id);
        self.total_quantity = self.total_quantity + remaining;
    }

    /// The oldest order still resident.
    pub fn head(&self) -> Option<&OrderId> {
        self.queue.front()
    }

    /// Remove the head order. The caller reports how much quantity it was
    /// still carrying so the aggregate stays exact.
    pub fn pop_head(&mut self, remaining: Quantity) -> Option<OrderId> {
        let id = self.queue.pop_front()?;
        self.total_quantity = self.total_quantity - remaining;
        Some(id)
    }

    /// Remove an arbitrary order by id (linear scan; only reachable through
    /// the book's id index on cancel/modify).
    pub fn remove(&mut self, order_id: &OrderId, remaining: Quantity) -> bool {
        match self.queue.iter().position(|id| id == order_id) {
            Some(pos) => {
                self.queue.remove(pos);
                self.total_quantity = self.total_quantity - remaining;
                true
            }
            None => false,
        }
    }

    /// Shrink the aggregate after a partial fill or an in-place quantity
    /// decrease; the order itself stays queued.
    pub fn reduce(&mut self, quantity: Quantity) {
        self.total_quantity = self.total_quantity - quantity;
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn total_quantity(&self) -> Quantity {
        self.total_quantity
    }

    pub fn order_count(&self) -> usize {
        self.queue.len()
    }

    /// Iterate handles in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &OrderId> {
        self.queue.iter()
    }
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_updates_aggregate() {
        let mut level = PriceLevel::new();
        level.push(OrderId::new("O-1"), Quantity::from_u64(10));
        level.push(OrderId::new("O-2"), Quantity::from_u64(5));

        assert_eq!(level.order_count(), 2);
        assert_eq!(level.total_quantity(), Quantity::from_u64(15));
        assert!(!level.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let mut level = PriceLevel::new();
        level.push(OrderId::new("O-1"), Quantity::from_u64(1));
        level.push(OrderId::new("O-2"), Quantity::from_u64(2));
        level.push(OrderId::new("O-3"), Quantity::from_u64(3));

        assert_eq!(level.head(), Some(&OrderId::new("O-1")));
        level.pop_head(Quantity::from_u64(1));
        assert_eq!(level.head(), Some(&OrderId::new("O-2")));
    }

    #[test]
    fn test_remove_middle_order() {
        let mut level = PriceLevel::new();
        level.push(OrderId::new("O-1"), Quantity::from_u64(1));
        level.push(OrderId::new("O-2"), Quantity::from_u64(2));
        level.push(OrderId::new("O-3"), Quantity::from_u64(3));

        assert!(level.remove(&OrderId::new("O-2"), Quantity::from_u64(2)));
        assert_eq!(level.order_count(), 2);
        assert_eq!(level.total_quantity(), Quantity::from_u64(4));
        assert!(!level.remove(&OrderId::new("O-2"), Quantity::from_u64(2)));
    }

    #[test]
    fn test_reduce_keeps_order_queued() {
        let mut level = PriceLevel::new();
        level.push(OrderId::new("O-1"), Quantity::from_u64(10));

        level.reduce(Quantity::from_u64(4));
        assert_eq!(level.total_quantity(), Quantity::from_u64(6));
        assert_eq!(level.order_count(), 1);
    }

    #[test]
    fn test_drains_to_empty() {
        let mut level = PriceLevel::new();
        level.push(OrderId::new("O-1"), Quantity::from_u64(10));
        level.pop_head(Quantity::from_u64(10));

        assert!(level.is_empty());
        assert!(level.total_quantity().is_zero());
    }
}
