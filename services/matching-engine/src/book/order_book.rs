//! Per-symbol order book and matching
//!
//! One book owns everything for a single symbol: the two price-ordered
//! sides, an id-indexed arena holding every live order exactly once, an
//! owner index, the two stop-loss stores, and last-trade statistics. All
//! operations run inside the book's exclusive section; the dispatcher
//! guarantees at most one request per symbol is in flight.
//!
//! Matching is strict price-time priority: the best opposite level is
//! consumed head-first, the execution price is the resting order's limit
//! price, and every fill emits exactly one trade.

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, warn};
use types::errors::EngineError;
use types::ids::{OrderId, Symbol, TradeId, UserId};
use types::numeric::{Price, Quantity};
use types::order::{CancelReason, Order, OrderStatus, OrderType, Side};
use types::trade::Trade;

use super::side::{BookSide, DepthLevel};
use super::stops::StopBook;

/// Result of a submit or modify against a book.
#[derive(Debug)]
pub struct SubmitOutcome {
    /// Trades in execution order; trades from triggered stop-loss orders
    /// follow the trades that triggered them.
    pub trades: Vec<Trade>,
    /// Advisory or rejecting error, if any.
    pub error: Option<EngineError>,
    /// Orders that left the book during this operation (filled, cancelled,
    /// rejected). Lets the dispatcher drop its routing entries.
    pub retired: Vec<OrderId>,
}

impl SubmitOutcome {
    /// Whether the request itself was accepted. Advisory errors
    /// (`NoLiquidity`, `TriggerCascade`) do not reject the request.
    pub fn accepted(&self) -> bool {
        self.error.as_ref().map_or(true, |e| !e.is_reject())
    }
}

/// Point-in-time statistics for one book.
#[derive(Debug, Clone, PartialEq)]
pub struct BookStats {
    pub symbol: Symbol,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub spread: Option<Decimal>,
    pub last_trade_price: Option<Price>,
    pub trade_count: u64,
    pub volume: Decimal,
    pub bid_orders: usize,
    pub ask_orders: usize,
    pub stop_orders: usize,
}

/// Order book for a single symbol.
#[derive(Debug)]
pub struct OrderBook {
    symbol: Symbol,
    bids: BookSide,
    asks: BookSide,
    /// Every live order, exactly once. The sides and stop stores hold id
    /// handles into this map.
    orders: HashMap<OrderId, Order>,
    owner_index: HashMap<UserId, HashSet<OrderId>>,
    buy_stops: StopBook,
    sell_stops: StopBook,
    last_trade_price: Option<Price>,
    trade_count: u64,
    volume: Decimal,
    trade_seq: u64,
    max_trigger_depth: u32,
    /// Ids retired during the current public operation.
    retired: Vec<OrderId>,
}

impl OrderBook {
    pub fn new(symbol: Symbol, max_trigger_depth: u32) -> Self {
        Self {
            symbol,
            bids: BookSide::new(Side::Buy),
            asks: BookSide::new(Side::Sell),
            orders: HashMap::new(),
            owner_index: HashMap::new(),
            buy_stops: StopBook::new(Side::Buy),
            sell_stops: StopBook::new(Side::Sell),
            last_trade_price: None,
            trade_count: 0,
            volume: Decimal::ZERO,
            trade_seq: 0,
            max_trigger_depth,
            retired: Vec::new(),
        }
    }

    // ── Submit ──────────────────────────────────────────────────────

    /// Submit an order: match it, rest any limit residual, trigger crossed
    /// stop-loss orders. Returns the trades produced, in execution order.
    pub fn submit(&mut self, order: Order) -> SubmitOutcome {
        self.retired.clear();
        let (trades, error) = self.submit_inner(order, 0);
        SubmitOutcome {
            trades,
            error,
            retired: std::mem::take(&mut self.retired),
        }
    }

    fn submit_inner(&mut self, mut order: Order, depth: u32) -> (Vec<Trade>, Option<EngineError>) {
        if order.symbol != self.symbol {
            return (
                Vec::new(),
                Some(EngineError::Validation(format!(
                    "order symbol {} does not match book symbol {}",
                    order.symbol, self.symbol
                ))),
            );
        }
        if self.orders.contains_key(&order.id) {
            // The live original keeps its routing entry; no retirement here.
            return (
                Vec::new(),
                Some(EngineError::Validation(format!(
                    "duplicate order id {}",
                    order.id
                ))),
            );
        }

        // Untriggered stop-loss orders park in the stop store, invisible to
        // matching.
        if order.is_stop_loss() {
            let Some(trigger) = order.trigger else {
                return (
                    Vec::new(),
                    Some(EngineError::Validation(
                        "stop-loss order requires a trigger price".to_string(),
                    )),
                );
            };
            match order.side {
                Side::Buy => self.buy_stops.push(trigger, order.id.clone()),
                Side::Sell => self.sell_stops.push(trigger, order.id.clone()),
            }
            debug!(order_id = %order.id, trigger = %trigger, "parked stop-loss order");
            self.index_order(order);
            return (Vec::new(), None);
        }

        let mut trades = Vec::new();
        let mut error = self.match_incoming(&mut order, &mut trades);

        if error.is_some() {
            // Cold-start market-against-market: the submit is rejected but
            // fills already executed are kept.
            order.reject();
            self.retired.push(order.id.clone());
        } else if order.remaining.is_zero() {
            self.retired.push(order.id.clone());
        } else if order.is_limit() {
            match order.price {
                Some(price) => {
                    self.side_mut(order.side)
                        .insert(price, order.id.clone(), order.remaining);
                    self.index_order(order);
                }
                None => {
                    error = Some(EngineError::Validation(
                        "limit order requires a price".to_string(),
                    ));
                    self.retired.push(order.id.clone());
                }
            }
        } else {
            // Market residual never rests.
            order.cancel(CancelReason::NoLiquidity);
            error = Some(EngineError::NoLiquidity(order.id.to_string()));
            self.retired.push(order.id.clone());
        }

        if !trades.is_empty() {
            // An aborted cascade outranks an advisory no-liquidity error;
            // the caller must see that triggers were cut short.
            if let Some(cascade) = self.fire_stops(&mut trades, depth) {
                error = Some(cascade);
            }
        }

        (trades, error)
    }

    /// The match loop: consume the best opposite level head-first while the
    /// incoming order still crosses.
    fn match_incoming(
        &mut self,
        incoming: &mut Order,
        trades: &mut Vec<Trade>,
    ) -> Option<EngineError> {
        loop {
            if incoming.remaining.is_zero() {
                return None;
            }
            let opposite = incoming.side.opposite();
            let best_price = self.side_ref(opposite).best_price()?;

            // Limit orders stop once the best level no longer crosses;
            // market orders never stop on price.
            if let Some(limit) = incoming.price {
                let crosses = match incoming.side {
                    Side::Buy => limit >= best_price,
                    Side::Sell => limit <= best_price,
                };
                if !crosses {
                    return None;
                }
            }

            let head_id = self.side_ref(opposite).head_at(best_price)?;

            let (resting_price, resting_remaining, compatible) =
                match self.orders.get(&head_id) {
                    Some(resting) => (
                        resting.price,
                        resting.remaining,
                        incoming.compatible_with(resting),
                    ),
                    None => {
                        error!(
                            symbol = %self.symbol,
                            order_id = %head_id,
                            "resting handle missing from id index; dropping handle"
                        );
                        self.side_mut(opposite)
                            .remove(best_price, &head_id, Quantity::zero());
                        continue;
                    }
                };
            if !compatible {
                error!(
                    symbol = %self.symbol,
                    order_id = %head_id,
                    "degenerate resting order at best level; discarding"
                );
                self.side_mut(opposite)
                    .remove(best_price, &head_id, resting_remaining);
                if let Some(mut dropped) = self.take_order(&head_id) {
                    dropped.cancel(CancelReason::InvariantViolation);
                    self.retired.push(head_id);
                }
                continue;
            }

            // Execution price: the resting limit's price. Resting orders
            // always carry one (market residuals never rest, restore
            // rejects priceless resting orders), so the remaining arms
            // only cover a degenerate head order: incoming limit, then
            // last trade price, then market-against-market rejection.
            let price = match resting_price.or(incoming.price).or(self.last_trade_price) {
                Some(p) => p,
                None => return Some(EngineError::NoReferencePrice),
            };

            let quantity = incoming.remaining.min(resting_remaining);
            incoming.fill(quantity);
            let resting_done = match self.orders.get_mut(&head_id) {
                Some(resting) => {
                    resting.fill(quantity);
                    resting.remaining.is_zero()
                }
                None => false,
            };

            self.side_mut(opposite).reduce_at(best_price, quantity);
            if resting_done {
                self.side_mut(opposite).pop_head(best_price);
                self.take_order(&head_id);
                self.retired.push(head_id.clone());
            }

            self.trade_seq += 1;
            let (buy_order_id, sell_order_id) = if incoming.is_buy() {
                (incoming.id.clone(), head_id)
            } else {
                (head_id, incoming.id.clone())
            };
            trades.push(Trade::new(
                TradeId::compose(&self.symbol, self.trade_seq),
                buy_order_id,
                sell_order_id,
                self.symbol.clone(),
                price,
                quantity,
                incoming.created_at,
            ));

            self.last_trade_price = Some(price);
            self.trade_count += 1;
            self.volume += quantity.as_decimal();
        }
    }

    /// Promote stop-loss orders crossed by the new last trade price,
    /// re-submitting each as a market order. Triggered submissions append
    /// their trades to the initiating batch.
    fn fire_stops(&mut self, trades: &mut Vec<Trade>, depth: u32) -> Option<EngineError> {
        loop {
            let last = self.last_trade_price?;
            let popped = self
                .buy_stops
                .pop_triggered(last)
                .or_else(|| self.sell_stops.pop_triggered(last));
            let order_id = popped?;

            let Some(mut stop) = self.take_order(&order_id) else {
                error!(
                    symbol = %self.symbol,
                    order_id = %order_id,
                    "parked stop handle missing from id index"
                );
                continue;
            };
            stop.mark_triggered();

            if depth >= self.max_trigger_depth {
                warn!(
                    symbol = %self.symbol,
                    order_id = %order_id,
                    depth,
                    "trigger cascade exceeded depth limit; aborting remaining triggers"
                );
                stop.reject();
                self.retired.push(order_id);
                return Some(EngineError::TriggerCascade(self.max_trigger_depth));
            }

            debug!(
                symbol = %self.symbol,
                order_id = %order_id,
                last_price = %last,
                "stop-loss triggered; re-submitting as market order"
            );
            let market = stop.into_market();
            let (chained, chained_error) = self.submit_inner(market, depth + 1);
            trades.extend(chained);
            if let Some(err @ EngineError::TriggerCascade(_)) = chained_error {
                return Some(err);
            }
            // NoLiquidity from the triggered market is already final: its
            // residual was cancelled. Keep draining triggers.
        }
    }

    // ── Cancel / modify / expiry ────────────────────────────────────

    /// Cancel a live order. Returns true iff the order was live and removed;
    /// repeat cancels and unknown ids return false.
    pub fn cancel(&mut self, order_id: &OrderId) -> bool {
        self.cancel_with_reason(order_id, CancelReason::UserRequested)
            .is_some()
    }

    /// Cancel with an explicit audit reason (user request, expiry sweep).
    pub fn cancel_with_reason(
        &mut self,
        order_id: &OrderId,
        reason: CancelReason,
    ) -> Option<Order> {
        let mut order = self.detach(order_id)?;
        order.cancel(reason);
        debug!(symbol = %self.symbol, order_id = %order_id, ?reason, "cancelled order");
        Some(order)
    }

    /// Modify an order's price and/or quantity.
    ///
    /// A pure quantity-decrease shrinks the resident order in place and
    /// keeps its time priority. Any price change or quantity increase
    /// cancels and resubmits with a fresh arrival timestamp, re-running the
    /// match loop.
    pub fn modify(
        &mut self,
        order_id: &OrderId,
        new_price: Option<Price>,
        new_quantity: Option<Quantity>,
        now_micros: i64,
    ) -> SubmitOutcome {
        self.retired.clear();
        let (trades, error) = self.modify_inner(order_id, new_price, new_quantity, now_micros);
        SubmitOutcome {
            trades,
            error,
            retired: std::mem::take(&mut self.retired),
        }
    }

    fn modify_inner(
        &mut self,
        order_id: &OrderId,
        new_price: Option<Price>,
        new_quantity: Option<Quantity>,
        now_micros: i64,
    ) -> (Vec<Trade>, Option<EngineError>) {
        let reject = |e: EngineError| (Vec::new(), Some(e));

        let Some(order) = self.orders.get(order_id) else {
            return reject(EngineError::UnknownOrder(order_id.to_string()));
        };
        if new_price.is_none() && new_quantity.is_none() {
            return (Vec::new(), None);
        }
        if order.is_stop_loss() && new_price.is_some() {
            return reject(EngineError::Validation(
                "stop-loss orders execute at market; their price cannot be modified".to_string(),
            ));
        }
        if let Some(q) = new_quantity {
            if q <= order.filled {
                return reject(EngineError::Validation(format!(
                    "new quantity {} does not exceed filled quantity {}",
                    q, order.filled
                )));
            }
        }

        let price_changed = match (new_price, order.price) {
            (Some(new), Some(old)) => new != old,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let quantity = new_quantity.unwrap_or(order.quantity);

        if !price_changed && quantity <= order.quantity {
            if quantity == order.quantity {
                return (Vec::new(), None);
            }
            // In-place shrink: time priority retained.
            let shrink = order.quantity - quantity;
            let (order_type, side, price) = (order.order_type, order.side, order.price);
            let resident = self.orders.get_mut(order_id).expect("checked above");
            resident.quantity = quantity;
            resident.remaining = quantity - resident.filled;
            if order_type != OrderType::StopLoss {
                if let Some(price) = price {
                    self.side_mut(side).reduce_at(price, shrink);
                }
            }
            debug!(
                symbol = %self.symbol,
                order_id = %order_id,
                quantity = %quantity,
                "shrunk resident order in place"
            );
            return (Vec::new(), None);
        }

        // Replacement: cancel and resubmit under a fresh arrival timestamp.
        let Some(old) = self.detach(order_id) else {
            return reject(EngineError::UnknownOrder(order_id.to_string()));
        };
        let mut replacement = old;
        if replacement.is_limit() {
            replacement.price = new_price.or(replacement.price);
        }
        replacement.quantity = quantity;
        replacement.remaining = quantity - replacement.filled;
        replacement.status = if replacement.filled.is_zero() {
            OrderStatus::Pending
        } else {
            OrderStatus::PartialFill
        };
        replacement.created_at = now_micros;

        debug!(
            symbol = %self.symbol,
            order_id = %order_id,
            "replacing order; time priority reset"
        );
        self.submit_inner(replacement, 0)
    }

    /// Cancel every resting order (book and stop store) that arrived before
    /// the cutoff. Returns the cancelled orders for audit.
    pub fn expire_before(&mut self, cutoff_micros: i64) -> Vec<Order> {
        let expired_ids: Vec<OrderId> = self
            .orders
            .values()
            .filter(|o| o.created_at < cutoff_micros)
            .map(|o| o.id.clone())
            .collect();

        let mut expired = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(order) = self.cancel_with_reason(&id, CancelReason::Expired) {
                expired.push(order);
            }
        }
        if !expired.is_empty() {
            debug!(symbol = %self.symbol, count = expired.len(), "expired resting orders");
        }
        expired
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.best_price()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.best_price()
    }

    /// Best ask minus best bid; None while either side is empty.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    pub fn top_of_book(&self) -> (Option<Price>, Option<Price>) {
        (self.best_bid(), self.best_ask())
    }

    /// Top-n price levels of one side, best first.
    pub fn depth(&self, side: Side, levels: usize) -> Vec<DepthLevel> {
        self.side_ref(side).depth(levels)
    }

    pub fn get_order(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.get(order_id)
    }

    /// All live orders for one owner, oldest first.
    pub fn user_orders(&self, owner: &UserId) -> Vec<&Order> {
        let mut orders: Vec<&Order> = self
            .owner_index
            .get(owner)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.orders.get(id))
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id.clone()));
        orders
    }

    pub fn last_trade_price(&self) -> Option<Price> {
        self.last_trade_price
    }

    /// Number of live orders (both sides and both stop stores).
    pub fn live_order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn stats(&self) -> BookStats {
        BookStats {
            symbol: self.symbol.clone(),
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            spread: self.spread(),
            last_trade_price: self.last_trade_price,
            trade_count: self.trade_count,
            volume: self.volume,
            bid_orders: self.bids.order_count(),
            ask_orders: self.asks.order_count(),
            stop_orders: self.buy_stops.len() + self.sell_stops.len(),
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn side_ref(&self, side: Side) -> &BookSide {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn index_order(&mut self, order: Order) {
        self.owner_index
            .entry(order.owner.clone())
            .or_default()
            .insert(order.id.clone());
        self.orders.insert(order.id.clone(), order);
    }

    /// Remove an order from the arena and owner index. Does not touch the
    /// price structures; callers detach those first.
    fn take_order(&mut self, order_id: &OrderId) -> Option<Order> {
        let order = self.orders.remove(order_id)?;
        if let Some(ids) = self.owner_index.get_mut(&order.owner) {
            ids.remove(order_id);
            if ids.is_empty() {
                self.owner_index.remove(&order.owner);
            }
        }
        Some(order)
    }

    /// Detach an order from every structure without changing its status.
    fn detach(&mut self, order_id: &OrderId) -> Option<Order> {
        let (order_type, side, price, trigger, remaining) = {
            let order = self.orders.get(order_id)?;
            (
                order.order_type,
                order.side,
                order.price,
                order.trigger,
                order.remaining,
            )
        };
        let removed = match order_type {
            OrderType::StopLoss => {
                let trigger = trigger?;
                match side {
                    Side::Buy => self.buy_stops.remove(trigger, order_id),
                    Side::Sell => self.sell_stops.remove(trigger, order_id),
                }
            }
            _ => {
                let price = price?;
                self.side_mut(side).remove(price, order_id, remaining)
            }
        };
        if !removed {
            error!(
                symbol = %self.symbol,
                order_id = %order_id,
                "indexed order not found in its price structure"
            );
            return None;
        }
        self.take_order(order_id)
    }

    // Snapshot restore constructs books field by field; see snapshot.rs.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        symbol: Symbol,
        last_trade_price: Option<Price>,
        trade_count: u64,
        volume: Decimal,
        trade_seq: u64,
        max_trigger_depth: u32,
    ) -> Self {
        let mut book = Self::new(symbol, max_trigger_depth);
        book.last_trade_price = last_trade_price;
        book.trade_count = trade_count;
        book.volume = volume;
        book.trade_seq = trade_seq;
        book
    }

    pub(crate) fn trade_seq(&self) -> u64 {
        self.trade_seq
    }

    pub(crate) fn restore_resting(&mut self, order: Order) {
        if let Some(price) = order.price {
            self.side_mut(order.side)
                .insert(price, order.id.clone(), order.remaining);
        }
        self.index_order(order);
    }

    pub(crate) fn restore_stop(&mut self, order: Order) {
        if let Some(trigger) = order.trigger {
            match order.side {
                Side::Buy => self.buy_stops.push(trigger, order.id.clone()),
                Side::Sell => self.sell_stops.push(trigger, order.id.clone()),
            }
        }
        self.index_order(order);
    }

    pub(crate) fn resting_order_ids(&self, side: Side) -> Vec<OrderId> {
        self.side_ref(side).order_ids()
    }

    pub(crate) fn stop_order_ids(&self) -> Vec<OrderId> {
        let mut ids = self.buy_stops.order_ids();
        ids.extend(self.sell_stops.order_ids());
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::order::OrderStatus;

    fn book() -> OrderBook {
        OrderBook::new(Symbol::new("AAPL"), 64)
    }

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

    fn market(id: &str, side: Side, qty: u64, ts: i64) -> Order {
        Order::new(
            OrderId::new(id),
            UserId::new("bob"),
            Symbol::new("AAPL"),
            OrderType::Market,
            side,
            None,
            Quantity::from_u64(qty),
            None,
            ts,
        )
        .unwrap()
    }

    fn stop(id: &str, side: Side, qty: u64, trigger: u64, ts: i64) -> Order {
        Order::new(
            OrderId::new(id),
            UserId::new("carol"),
            Symbol::new("AAPL"),
            OrderType::StopLoss,
            side,
            None,
            Quantity::from_u64(qty),
            Some(Price::from_u64(trigger)),
            ts,
        )
        .unwrap()
    }

    #[test]
    fn test_resting_order_no_match() {
        let mut book = book();
        let outcome = book.submit(limit("B-1", Side::Buy, 150, 100, 1));

        assert!(outcome.trades.is_empty());
        assert!(outcome.error.is_none());
        assert_eq!(book.best_bid(), Some(Price::from_u64(150)));
        assert!(book.get_order(&OrderId::new("B-1")).is_some());
    }

    #[test]
    fn test_full_cross_empties_book() {
        let mut book = book();
        book.submit(limit("B-1", Side::Buy, 150, 100, 1));
        let outcome = book.submit(limit("S-1", Side::Sell, 150, 100, 2));

        assert_eq!(outcome.trades.len(), 1);
        let trade = &outcome.trades[0];
        assert_eq!(trade.buy_order_id, OrderId::new("B-1"));
        assert_eq!(trade.sell_order_id, OrderId::new("S-1"));
        assert_eq!(trade.price, Price::from_u64(150));
        assert_eq!(trade.quantity, Quantity::from_u64(100));

        assert!(book.is_empty());
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        // Both sides retired.
        assert!(outcome.retired.contains(&OrderId::new("B-1")));
        assert!(outcome.retired.contains(&OrderId::new("S-1")));
    }

    #[test]
    fn test_partial_fill_residual_rests_at_resting_price() {
        let mut book = book();
        book.submit(limit("B-1", Side::Buy, 150, 100, 1));
        let outcome = book.submit(limit("S-1", Side::Sell, 149, 40, 2));

        // Execution at the resting buy's price.
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].price, Price::from_u64(150));
        assert_eq!(outcome.trades[0].quantity, Quantity::from_u64(40));

        let residual = book.get_order(&OrderId::new("B-1")).unwrap();
        assert_eq!(residual.remaining, Quantity::from_u64(60));
        assert_eq!(residual.status, OrderStatus::PartialFill);
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_price_time_priority_fifo() {
        let mut book = book();
        book.submit(limit("S-a", Side::Sell, 100, 50, 1));
        book.submit(limit("S-b", Side::Sell, 100, 50, 2));
        let outcome = book.submit(limit("B-c", Side::Buy, 100, 60, 3));

        assert_eq!(outcome.trades.len(), 2);
        assert_eq!(outcome.trades[0].sell_order_id, OrderId::new("S-a"));
        assert_eq!(outcome.trades[0].quantity, Quantity::from_u64(50));
        assert_eq!(outcome.trades[1].sell_order_id, OrderId::new("S-b"));
        assert_eq!(outcome.trades[1].quantity, Quantity::from_u64(10));

        let survivor = book.get_order(&OrderId::new("S-b")).unwrap();
        assert_eq!(survivor.remaining, Quantity::from_u64(40));
    }

    #[test]
    fn test_better_price_consumed_first() {
        let mut book = book();
        book.submit(limit("S-1", Side::Sell, 101, 10, 1));
        book.submit(limit("S-2", Side::Sell, 100, 10, 2));
        let outcome = book.submit(limit("B-1", Side::Buy, 101, 20, 3));

        assert_eq!(outcome.trades.len(), 2);
        assert_eq!(outcome.trades[0].sell_order_id, OrderId::new("S-2"));
        assert_eq!(outcome.trades[0].price, Price::from_u64(100));
        assert_eq!(outcome.trades[1].sell_order_id, OrderId::new("S-1"));
        assert_eq!(outcome.trades[1].price, Price::from_u64(101));
    }

    #[test]
    fn test_market_without_liquidity_is_cancelled() {
        let mut book = book();
        let outcome = book.submit(market("M-1", Side::Buy, 10, 1));

        assert!(outcome.trades.is_empty());
        assert_eq!(
            outcome.error,
            Some(EngineError::NoLiquidity("M-1".to_string()))
        );
        assert!(outcome.accepted());
        assert!(book.is_empty());
    }

    #[test]
    fn test_market_partial_then_residual_cancelled() {
        let mut book = book();
        book.submit(limit("S-1", Side::Sell, 100, 30, 1));
        let outcome = book.submit(market("M-1", Side::Buy, 50, 2));

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].quantity, Quantity::from_u64(30));
        assert_eq!(
            outcome.error,
            Some(EngineError::NoLiquidity("M-1".to_string()))
        );
        // The market residual never rests.
        assert_eq!(book.best_bid(), None);
    }

    #[test]
    fn test_limit_does_not_cross_spread() {
        let mut book = book();
        book.submit(limit("S-1", Side::Sell, 101, 10, 1));
        let outcome = book.submit(limit("B-1", Side::Buy, 100, 10, 2));

        assert!(outcome.trades.is_empty());
        assert_eq!(book.best_bid(), Some(Price::from_u64(100)));
        assert_eq!(book.best_ask(), Some(Price::from_u64(101)));
        assert_eq!(book.spread(), Some(Decimal::ONE));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut book = book();
        book.submit(limit("B-1", Side::Buy, 150, 100, 1));

        assert!(book.cancel(&OrderId::new("B-1")));
        assert!(!book.cancel(&OrderId::new("B-1")));
        assert!(!book.cancel(&OrderId::new("missing")));
        assert!(book.is_empty());
    }

    #[test]
    fn test_cancel_parked_stop() {
        let mut book = book();
        book.submit(stop("St-1", Side::Sell, 50, 96, 1));
        assert_eq!(book.stats().stop_orders, 1);

        assert!(book.cancel(&OrderId::new("St-1")));
        assert_eq!(book.stats().stop_orders, 0);
        assert!(book.is_empty());
    }

    #[test]
    fn test_stop_is_invisible_to_matching() {
        let mut book = book();
        book.submit(stop("St-1", Side::Sell, 50, 96, 1));

        assert_eq!(book.best_ask(), None);
        let outcome = book.submit(market("M-1", Side::Buy, 10, 2));
        assert!(outcome.trades.is_empty());
        assert!(matches!(outcome.error, Some(EngineError::NoLiquidity(_))));
    }

    #[test]
    fn test_stop_triggers_after_price_moves() {
        let mut book = book();
        // Establish a last trade at 100.
        book.submit(limit("S-0", Side::Sell, 100, 10, 1));
        book.submit(limit("B-0", Side::Buy, 100, 10, 2));
        assert_eq!(book.last_trade_price(), Some(Price::from_u64(100)));

        // Resting liquidity plus a sell stop at 96.
        book.submit(limit("S-1", Side::Sell, 95, 100, 3));
        book.submit(limit("B-bid", Side::Buy, 94, 100, 4));
        book.submit(stop("St-1", Side::Sell, 50, 96, 5));

        // A buy at 95 prints 95, crossing the stop's trigger.
        let outcome = book.submit(limit("B-1", Side::Buy, 95, 10, 6));

        assert!(outcome.trades.len() >= 2);
        assert_eq!(outcome.trades[0].price, Price::from_u64(95));
        assert_eq!(outcome.trades[0].buy_order_id, OrderId::new("B-1"));
        // The stop's market execution follows the triggering trade.
        assert_eq!(outcome.trades[1].sell_order_id, OrderId::new("St-1"));
        assert_eq!(book.stats().stop_orders, 0);
    }

    #[test]
    fn test_trigger_cascade_depth_limit() {
        let mut book = OrderBook::new(Symbol::new("AAPL"), 1);
        // Reference price 100.
        book.submit(limit("S-0", Side::Sell, 100, 10, 1));
        book.submit(limit("B-0", Side::Buy, 100, 10, 2));

        // Deep resting bids so triggered sells keep printing lower prices.
        book.submit(limit("B-1", Side::Buy, 95, 10, 3));
        book.submit(limit("B-2", Side::Buy, 90, 10, 4));

        // Two sell stops: the first triggers at depth 1, its print at 90
        // crosses the second, which would need depth 2.
        book.submit(stop("St-1", Side::Sell, 20, 96, 5));
        book.submit(stop("St-2", Side::Sell, 10, 92, 6));

        // Sell at 95 prints 95: St-1 fires, consumes both bids (95 then 90);
        // the 90 print crosses St-2's trigger but depth 1 is the limit.
        let outcome = book.submit(limit("S-1", Side::Sell, 95, 10, 7));

        assert_eq!(outcome.error, Some(EngineError::TriggerCascade(1)));
        assert!(outcome.accepted());
        // St-2 was popped, marked rejected, and retired without executing.
        assert!(outcome.retired.contains(&OrderId::new("St-2")));
        assert!(book.get_order(&OrderId::new("St-2")).is_none());
        assert_eq!(book.stats().stop_orders, 0);
    }

    #[test]
    fn test_modify_decrease_keeps_priority() {
        let mut book = book();
        book.submit(limit("B-1", Side::Buy, 100, 10, 1));
        book.submit(limit("B-2", Side::Buy, 100, 10, 2));

        let outcome = book.modify(
            &OrderId::new("B-1"),
            None,
            Some(Quantity::from_u64(5)),
            3,
        );
        assert!(outcome.trades.is_empty());
        assert!(outcome.error.is_none());

        // B-1 still fills first.
        let sell = book.submit(limit("S-1", Side::Sell, 100, 5, 4));
        assert_eq!(sell.trades[0].buy_order_id, OrderId::new("B-1"));
    }

    #[test]
    fn test_modify_price_change_loses_priority() {
        let mut book = book();
        book.submit(limit("B-1", Side::Buy, 100, 10, 1));
        book.submit(limit("B-2", Side::Buy, 100, 10, 2));

        // Move away and back: two replacements, both resetting arrival.
        book.modify(&OrderId::new("B-1"), Some(Price::from_u64(101)), None, 3);
        book.modify(&OrderId::new("B-1"), Some(Price::from_u64(100)), None, 4);

        let sell = book.submit(limit("S-1", Side::Sell, 100, 10, 5));
        assert_eq!(sell.trades.len(), 1);
        assert_eq!(sell.trades[0].buy_order_id, OrderId::new("B-2"));
        assert!(book.get_order(&OrderId::new("B-1")).is_some());
    }

    #[test]
    fn test_modify_to_crossing_price_rematches() {
        let mut book = book();
        book.submit(limit("S-1", Side::Sell, 101, 10, 1));
        book.submit(limit("B-1", Side::Buy, 99, 10, 2));

        let outcome = book.modify(&OrderId::new("B-1"), Some(Price::from_u64(101)), None, 3);
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].price, Price::from_u64(101));
        assert!(book.is_empty());
    }

    #[test]
    fn test_modify_unknown_order() {
        let mut book = book();
        let outcome = book.modify(&OrderId::new("nope"), None, Some(Quantity::from_u64(5)), 1);
        assert!(matches!(outcome.error, Some(EngineError::UnknownOrder(_))));
    }

    #[test]
    fn test_modify_below_filled_rejected() {
        let mut book = book();
        book.submit(limit("B-1", Side::Buy, 100, 10, 1));
        book.submit(limit("S-1", Side::Sell, 100, 4, 2));

        // B-1 has 4 filled; new total of 4 would leave nothing remaining.
        let outcome = book.modify(&OrderId::new("B-1"), None, Some(Quantity::from_u64(4)), 3);
        assert!(matches!(outcome.error, Some(EngineError::Validation(_))));
        assert_eq!(
            book.get_order(&OrderId::new("B-1")).unwrap().remaining,
            Quantity::from_u64(6)
        );
    }

    #[test]
    fn test_expire_before_cutoff() {
        let mut book = book();
        book.submit(limit("B-1", Side::Buy, 100, 10, 1_000));
        book.submit(limit("B-2", Side::Buy, 99, 10, 5_000));
        book.submit(stop("St-1", Side::Sell, 5, 96, 2_000));

        let expired = book.expire_before(3_000);
        let mut ids: Vec<&str> = expired.iter().map(|o| o.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["B-1", "St-1"]);
        assert!(expired
            .iter()
            .all(|o| o.status == OrderStatus::Cancelled(CancelReason::Expired)));
        assert_eq!(book.live_order_count(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut book = book();
        book.submit(limit("B-1", Side::Buy, 100, 10, 1));
        let outcome = book.submit(limit("B-1", Side::Buy, 101, 10, 2));

        assert!(matches!(outcome.error, Some(EngineError::Validation(_))));
        // The original is untouched.
        assert_eq!(
            book.get_order(&OrderId::new("B-1")).unwrap().price,
            Some(Price::from_u64(100))
        );
    }

    #[test]
    fn test_symbol_mismatch_rejected() {
        let mut book = book();
        let foreign = Order::new(
            OrderId::new("X-1"),
            UserId::new("alice"),
            Symbol::new("MSFT"),
            OrderType::Limit,
            Side::Buy,
            Some(Price::from_u64(100)),
            Quantity::from_u64(10),
            None,
            1,
        )
        .unwrap();

        let outcome = book.submit(foreign);
        assert!(matches!(outcome.error, Some(EngineError::Validation(_))));
        assert!(book.is_empty());
    }

    #[test]
    fn test_user_orders_sorted_by_arrival() {
        let mut book = book();
        book.submit(limit("B-2", Side::Buy, 99, 10, 2));
        book.submit(limit("B-1", Side::Buy, 100, 10, 1));

        let orders = book.user_orders(&UserId::new("alice"));
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id, OrderId::new("B-1"));
        assert_eq!(orders[1].id, OrderId::new("B-2"));
        assert!(book.user_orders(&UserId::new("nobody")).is_empty());
    }

    #[test]
    fn test_stats_accumulate() {
        let mut book = book();
        book.submit(limit("S-1", Side::Sell, 100, 10, 1));
        book.submit(limit("B-1", Side::Buy, 100, 10, 2));
        book.submit(limit("S-2", Side::Sell, 101, 5, 3));

        let stats = book.stats();
        assert_eq!(stats.trade_count, 1);
        assert_eq!(stats.volume, Decimal::from(10));
        assert_eq!(stats.last_trade_price, Some(Price::from_u64(100)));
        assert_eq!(stats.ask_orders, 1);
        assert_eq!(stats.bid_orders, 0);
    }

    #[test]
    fn test_crossing_invariant_held() {
        let mut book = book();
        book.submit(limit("S-1", Side::Sell, 101, 10, 1));
        book.submit(limit("B-1", Side::Buy, 100, 10, 2));
        book.submit(limit("B-2", Side::Buy, 101, 4, 3));
        book.submit(limit("S-2", Side::Sell, 99, 20, 4));

        if let (Some(bid), Some(ask)) = book.top_of_book() {
            assert!(bid < ask, "book must never be crossed: {} >= {}", bid, ask);
        }
    }

    #[test]
    fn test_conservation_of_quantity() {
        let mut book = book();
        let submitted: u64 = 10 + 7 + 12 + 9;
        let outcomes = vec![
            book.submit(limit("S-1", Side::Sell, 100, 10, 1)),
            book.submit(limit("S-2", Side::Sell, 101, 7, 2)),
            book.submit(limit("B-1", Side::Buy, 101, 12, 3)),
            book.submit(market("M-1", Side::Buy, 9, 4)),
        ];

        let traded: Decimal = outcomes
            .iter()
            .flat_map(|o| o.trades.iter())
            .map(|t| t.quantity.as_decimal())
            .sum();
        let live: Decimal = [
            book.get_order(&OrderId::new("S-1")),
            book.get_order(&OrderId::new("S-2")),
            book.get_order(&OrderId::new("B-1")),
            book.get_order(&OrderId::new("M-1")),
        ]
        .iter()
        .flatten()
        .map(|o| o.remaining.as_decimal())
        .sum();

        // Each unit traded consumes one unit from each side; the market
        // residual (if any) was cancelled, not rested.
        let cancelled = Decimal::from(9)
            - outcomes[3]
                .trades
                .iter()
                .map(|t| t.quantity.as_decimal())
                .sum::<Decimal>();
        assert_eq!(Decimal::from(submitted), traded * Decimal::TWO + live + cancelled);
    }
}
