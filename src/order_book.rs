//! Per-symbol order book: two price ladders, an order index, and matching.
//!
//! Bids descend, asks ascend, so each ladder's first node is its best price.
//! Matching walks the opposite ladder's best level and fills against the
//! earliest resting order there; trades always print at the maker's price.
//! The book's read-write gate makes `match_order` and `cancel` linearizable
//! against each other and against snapshot readers; the ladders and levels
//! keep their own internal locks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::error::EngineError;
use crate::pool::Pools;
use crate::price_ladder::{price_eq, PriceLadder};
use crate::price_level::PriceLevel;
use crate::types::{
    now_millis, now_nanos, BookSnapshot, BookStats, LevelView, MatchResult, Order, RestingOrder,
    Side,
};

pub struct OrderBook {
    symbol: String,
    bids: PriceLadder,
    asks: PriceLadder,
    /// Resting orders by id, for cancels. Shares instances with the FIFOs.
    orders: DashMap<u64, Arc<RestingOrder>>,
    version: AtomicU64,
    trade_seq: Arc<AtomicU64>,
    stats: Mutex<BookStats>,
    gate: RwLock<()>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self::with_trade_sequence(symbol, Arc::new(AtomicU64::new(1)))
    }

    /// Builds a book sharing a trade-id sequence with other books.
    pub fn with_trade_sequence(symbol: impl Into<String>, trade_seq: Arc<AtomicU64>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: PriceLadder::new(true),
            asks: PriceLadder::new(false),
            orders: DashMap::new(),
            version: AtomicU64::new(0),
            trade_seq,
            stats: Mutex::new(BookStats::default()),
            gate: RwLock::new(()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Matches one order against the book and mutates it accordingly.
    ///
    /// Price-time priority: best opposite level first, earliest order within
    /// the level first. A limit residual rests at its own price; a market
    /// residual is reported unfilled and never rests. The book version is
    /// incremented exactly once per call.
    pub fn match_order(
        &self,
        mut taker: Box<Order>,
        pools: &Pools,
    ) -> Result<Box<MatchResult>, EngineError> {
        let started = Instant::now();
        let _guard = self.gate.write();

        let mut result = pools.results.acquire();
        result.timestamp = now_nanos();

        let book_side = match taker.side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };

        let mut remaining = taker.quantity;
        while remaining > 0 {
            let Some(level) = book_side.best() else {
                break;
            };
            if taker.is_limit() && !Self::crosses(taker.side, taker.price, level.price()) {
                break;
            }

            let Some(maker) = level.peek_front() else {
                return Err(EngineError::InvariantViolation(
                    "non-empty level with empty order queue",
                ));
            };
            let maker_remaining = maker.remaining();
            if maker_remaining <= 0 {
                return Err(EngineError::InvariantViolation(
                    "resting order with non-positive remaining quantity",
                ));
            }

            let fill = remaining.min(maker_remaining);
            let mut trade = pools.trades.acquire();
            trade.trade_id = self.trade_seq.fetch_add(1, Ordering::Relaxed);
            trade.taker_order_id = taker.id;
            trade.maker_order_id = maker.id;
            trade.symbol = self.symbol.clone();
            trade.price = level.price();
            trade.quantity = fill;
            trade.timestamp = now_nanos();
            trade.taker_side = taker.side;
            result.trades.push(trade);

            remaining -= fill;
            maker.remaining.fetch_sub(fill, Ordering::AcqRel);
            level.reduce(fill);
            if maker.remaining() == 0 {
                // Fully consumed: out of the FIFO and out of the index. A
                // partially filled maker keeps its place at the head.
                level.pop_front();
                self.orders.remove(&maker.id);
            }

            let level_qty = level.total_qty();
            if level_qty < 0 {
                return Err(EngineError::InvariantViolation("negative level quantity"));
            }
            if level_qty == 0 {
                book_side.remove(level.price());
            }
        }

        if remaining > 0 && taker.is_limit() {
            self.rest(&taker, remaining);
        }
        taker.quantity = remaining;
        result.taker = Some(taker);

        self.version.fetch_add(1, Ordering::AcqRel);
        self.update_stats(result.trades.len() as u64, started);
        Ok(result)
    }

    /// Does a limit taker's price reach the maker level?
    fn crosses(side: Side, taker_price: f64, maker_price: f64) -> bool {
        if price_eq(taker_price, maker_price) {
            return true;
        }
        match side {
            Side::Buy => taker_price > maker_price,
            Side::Sell => taker_price < maker_price,
        }
    }

    /// Rests a limit residual at its own price, creating the level if absent.
    fn rest(&self, taker: &Order, remaining: i64) {
        let ladder = match taker.side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        let level = match ladder.get(taker.price) {
            Some(level) => level,
            None => {
                let level = Arc::new(PriceLevel::new(taker.price));
                ladder.insert(taker.price, Arc::clone(&level));
                level
            }
        };
        let resting = Arc::new(RestingOrder::from_order(taker, remaining));
        level.enqueue(Arc::clone(&resting));
        self.orders.insert(taker.id, resting);
    }

    /// Removes a resting order. Returns false when the id is not resting
    /// (already filled, cancelled, or never accepted).
    pub fn cancel(&self, order_id: u64) -> bool {
        let _guard = self.gate.write();

        let Some((_, resting)) = self.orders.remove(&order_id) else {
            return false;
        };
        let ladder = match resting.side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        let Some(level) = ladder.get(resting.price) else {
            return false;
        };
        if level.remove(order_id).is_none() {
            return false;
        }
        if level.total_qty() == 0 {
            ladder.remove(resting.price);
        }
        self.version.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Best-`depth` levels per side with aggregates, plus wall-clock time.
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        let _guard = self.gate.read();
        BookSnapshot {
            symbol: self.symbol.clone(),
            bids: Self::level_views(&self.bids, depth),
            asks: Self::level_views(&self.asks, depth),
            time: now_millis(),
        }
    }

    fn level_views(ladder: &PriceLadder, depth: usize) -> Vec<LevelView> {
        ladder
            .top(depth)
            .iter()
            .map(|level| LevelView {
                price: level.price(),
                quantity: level.total_qty(),
                count: level.order_count(),
            })
            .collect()
    }

    pub fn best_bid(&self) -> Option<f64> {
        let _guard = self.gate.read();
        self.bids.best().map(|level| level.price())
    }

    pub fn best_ask(&self) -> Option<f64> {
        let _guard = self.gate.read();
        self.asks.best().map(|level| level.price())
    }

    /// Ask minus bid; `None` when either side is empty.
    pub fn spread(&self) -> Option<f64> {
        let _guard = self.gate.read();
        match (
            self.bids.best().map(|l| l.price()),
            self.asks.best().map(|l| l.price()),
        ) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Number of populated levels across both sides.
    pub fn depth(&self) -> usize {
        let _guard = self.gate.read();
        self.bids.len() + self.asks.len()
    }

    pub fn bid_volume(&self) -> i64 {
        let _guard = self.gate.read();
        self.bids.total_qty()
    }

    pub fn ask_volume(&self) -> i64 {
        let _guard = self.gate.read();
        self.asks.total_qty()
    }

    pub fn resting_order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn contains_order(&self, order_id: u64) -> bool {
        self.orders.contains_key(&order_id)
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> BookStats {
        *self.stats.lock()
    }

    fn update_stats(&self, trades: u64, started: Instant) {
        let latency = started.elapsed().as_nanos() as u64;
        let mut stats = self.stats.lock();
        stats.orders_processed += 1;
        stats.trades_executed += trades;
        stats.avg_latency_ns = if stats.orders_processed == 1 {
            latency
        } else {
            (stats.avg_latency_ns * (stats.orders_processed - 1) + latency)
                / stats.orders_processed
        };
        stats.last_update_ms = now_millis();
    }

    /// Structural and accounting check for diagnostics and tests: ladders
    /// ordered, level aggregates matching their queues, index consistent.
    pub fn validate(&self) -> bool {
        let _guard = self.gate.read();
        if !self.bids.validate() || !self.asks.validate() {
            return false;
        }
        let mut consistent = true;
        for ladder in [&self.bids, &self.asks] {
            ladder.for_each(|level| {
                if level.total_qty() != level.queued_qty() || level.total_qty() <= 0 {
                    consistent = false;
                    return false;
                }
                true
            });
        }
        if !consistent {
            return false;
        }
        self.bids.order_count() + self.asks.order_count() == self.orders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderType;

    fn order(id: u64, side: Side, order_type: OrderType, price: f64, qty: i64) -> Box<Order> {
        Box::new(Order {
            id,
            symbol: "BTCUSDT".into(),
            price,
            quantity: qty,
            side,
            order_type,
            client_id: format!("c{id}"),
            timestamp: id as i64,
            version: 0,
        })
    }

    fn limit(id: u64, side: Side, price: f64, qty: i64) -> Box<Order> {
        order(id, side, OrderType::Limit, price, qty)
    }

    #[test]
    fn limit_buy_rests_on_empty_book() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        let result = book.match_order(limit(1, Side::Buy, 100.0, 10), &pools).unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.taker.as_ref().unwrap().quantity, 10);

        let snap = book.snapshot(10);
        assert_eq!(snap.bids.len(), 1);
        assert_eq!(snap.bids[0].price, 100.0);
        assert_eq!(snap.bids[0].quantity, 10);
        assert_eq!(snap.bids[0].count, 1);
        assert!(snap.asks.is_empty());
        assert!(book.validate());
    }

    #[test]
    fn crossing_sell_fills_at_maker_price() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        book.match_order(limit(1, Side::Buy, 100.0, 10), &pools).unwrap();
        let result = book.match_order(limit(2, Side::Sell, 100.0, 4), &pools).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.maker_order_id, 1);
        assert_eq!(trade.taker_order_id, 2);
        assert_eq!(trade.price, 100.0);
        assert_eq!(trade.quantity, 4);
        assert_eq!(trade.taker_side, Side::Sell);
        assert_eq!(result.taker.as_ref().unwrap().quantity, 0);

        let snap = book.snapshot(10);
        assert_eq!(snap.bids, vec![LevelView { price: 100.0, quantity: 6, count: 1 }]);
        assert!(book.validate());
    }

    #[test]
    fn price_improvement_goes_to_the_taker() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        book.match_order(limit(1, Side::Sell, 100.0, 5), &pools).unwrap();
        // Willing to pay 102, fills at the resting 100.
        let result = book.match_order(limit(2, Side::Buy, 102.0, 5), &pools).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].price, 100.0);
    }

    #[test]
    fn time_priority_within_level() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        book.match_order(limit(3, Side::Buy, 100.0, 5), &pools).unwrap();
        book.match_order(limit(4, Side::Buy, 100.0, 5), &pools).unwrap();
        let result = book.match_order(limit(5, Side::Sell, 99.0, 7), &pools).unwrap();

        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].maker_order_id, 3);
        assert_eq!(result.trades[0].quantity, 5);
        assert_eq!(result.trades[1].maker_order_id, 4);
        assert_eq!(result.trades[1].quantity, 2);
        assert_eq!(result.taker.as_ref().unwrap().quantity, 0);

        // Order 4 keeps its place with 3 remaining.
        let snap = book.snapshot(10);
        assert_eq!(snap.bids, vec![LevelView { price: 100.0, quantity: 3, count: 1 }]);
        assert!(!book.contains_order(3));
        assert!(book.contains_order(4));
        assert!(book.validate());
    }

    #[test]
    fn sweep_consumes_best_levels_in_order() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        book.match_order(limit(1, Side::Sell, 101.0, 5), &pools).unwrap();
        book.match_order(limit(2, Side::Sell, 100.0, 5), &pools).unwrap();
        book.match_order(limit(3, Side::Sell, 102.0, 5), &pools).unwrap();

        let result = book.match_order(limit(4, Side::Buy, 101.5, 8), &pools).unwrap();
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].price, 100.0);
        assert_eq!(result.trades[0].quantity, 5);
        assert_eq!(result.trades[1].price, 101.0);
        assert_eq!(result.trades[1].quantity, 3);

        // 102 does not cross; taker is done.
        assert_eq!(result.taker.as_ref().unwrap().quantity, 0);
        assert_eq!(book.best_ask(), Some(101.0));
        assert!(book.validate());
    }

    #[test]
    fn market_order_on_empty_side_is_not_rested() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        let result = book
            .match_order(order(6, Side::Sell, OrderType::Market, 0.0, 5), &pools)
            .unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.taker.as_ref().unwrap().quantity, 5);

        let snap = book.snapshot(10);
        assert!(snap.bids.is_empty());
        assert!(snap.asks.is_empty());
    }

    #[test]
    fn market_order_crosses_multiple_levels_then_abandons_residual() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        book.match_order(limit(1, Side::Sell, 100.0, 3), &pools).unwrap();
        book.match_order(limit(2, Side::Sell, 105.0, 3), &pools).unwrap();

        let result = book
            .match_order(order(3, Side::Buy, OrderType::Market, 0.0, 10), &pools)
            .unwrap();
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.total_filled_qty(), 6);
        assert_eq!(result.taker.as_ref().unwrap().quantity, 4);
        assert!(book.best_ask().is_none());
        assert!(book.best_bid().is_none(), "market residual must not rest");
    }

    #[test]
    fn no_crossed_book_after_matching() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        book.match_order(limit(1, Side::Sell, 101.0, 10), &pools).unwrap();
        book.match_order(limit(2, Side::Buy, 99.0, 10), &pools).unwrap();
        book.match_order(limit(3, Side::Sell, 100.0, 10), &pools).unwrap();
        book.match_order(limit(4, Side::Buy, 100.0, 10), &pools).unwrap();

        let (bid, ask) = (book.best_bid().unwrap(), book.best_ask().unwrap());
        assert!(bid < ask, "crossed book: bid {bid} >= ask {ask}");
    }

    #[test]
    fn cancel_removes_resting_order_and_level() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        book.match_order(limit(1, Side::Buy, 100.0, 10), &pools).unwrap();
        book.match_order(limit(2, Side::Buy, 100.0, 4), &pools).unwrap();

        assert!(book.cancel(1));
        let snap = book.snapshot(10);
        assert_eq!(snap.bids, vec![LevelView { price: 100.0, quantity: 4, count: 1 }]);
        assert!(!book.contains_order(1));

        assert!(book.cancel(2));
        assert!(book.snapshot(10).bids.is_empty());
        assert!(!book.cancel(2), "second cancel must fail");
        assert!(book.validate());
    }

    #[test]
    fn version_increments_once_per_mutation() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        assert_eq!(book.version(), 0);
        book.match_order(limit(1, Side::Buy, 100.0, 10), &pools).unwrap();
        assert_eq!(book.version(), 1);
        book.match_order(limit(2, Side::Sell, 100.0, 10), &pools).unwrap();
        assert_eq!(book.version(), 2);
        book.match_order(limit(3, Side::Buy, 100.0, 1), &pools).unwrap();
        book.cancel(3);
        assert_eq!(book.version(), 4);
    }

    #[test]
    fn stats_track_orders_and_trades() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        book.match_order(limit(1, Side::Sell, 100.0, 5), &pools).unwrap();
        book.match_order(limit(2, Side::Buy, 100.0, 5), &pools).unwrap();
        let stats = book.stats();
        assert_eq!(stats.orders_processed, 2);
        assert_eq!(stats.trades_executed, 1);
    }

    #[test]
    fn trade_ids_are_unique_and_increasing() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        book.match_order(limit(1, Side::Sell, 100.0, 2), &pools).unwrap();
        book.match_order(limit(2, Side::Sell, 100.0, 2), &pools).unwrap();
        let result = book.match_order(limit(3, Side::Buy, 100.0, 4), &pools).unwrap();
        assert_eq!(result.trades.len(), 2);
        assert!(result.trades[0].trade_id < result.trades[1].trade_id);
    }

    #[test]
    fn spread_and_volumes() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        assert!(book.spread().is_none());
        book.match_order(limit(1, Side::Buy, 99.0, 10), &pools).unwrap();
        book.match_order(limit(2, Side::Sell, 101.0, 7), &pools).unwrap();
        assert_eq!(book.spread(), Some(2.0));
        assert_eq!(book.bid_volume(), 10);
        assert_eq!(book.ask_volume(), 7);
        assert_eq!(book.depth(), 2);
    }

    #[test]
    fn snapshot_depth_limits_levels() {
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        for i in 0..5 {
            book.match_order(limit(i + 1, Side::Buy, 100.0 - i as f64, 1), &pools)
                .unwrap();
        }
        let snap = book.snapshot(3);
        assert_eq!(snap.bids.len(), 3);
        assert_eq!(snap.bids[0].price, 100.0);
        assert_eq!(snap.bids[2].price, 98.0);
    }
}
