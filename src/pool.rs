//! Object pools for the hot-path message types.
//!
//! Pools amortize allocation of [`Order`], [`Trade`], and [`MatchResult`] on
//! the submit → match → egress path. Objects move through the ring buffers as
//! `Box<T>`, so exactly-one return is enforced by ownership; `release` resets
//! every field before the object goes back on the free list, and acquire
//! therefore always hands out a field-zero object.

use parking_lot::Mutex;

use crate::types::{MatchResult, Order, Trade};

/// A poolable type: one `reset` that returns every field to its zero value.
pub trait Poolable: Default + Send {
    fn reset(&mut self);
}

impl Poolable for Order {
    fn reset(&mut self) {
        self.id = 0;
        self.symbol.clear();
        self.price = 0.0;
        self.quantity = 0;
        self.side = Default::default();
        self.order_type = Default::default();
        self.client_id.clear();
        self.timestamp = 0;
        self.version = 0;
    }
}

impl Poolable for Trade {
    fn reset(&mut self) {
        self.trade_id = 0;
        self.taker_order_id = 0;
        self.maker_order_id = 0;
        self.symbol.clear();
        self.price = 0.0;
        self.quantity = 0;
        self.timestamp = 0;
        self.taker_side = Default::default();
    }
}

impl Poolable for MatchResult {
    fn reset(&mut self) {
        self.trades.clear();
        self.taker = None;
        self.timestamp = 0;
    }
}

/// Free-list pool. Empty pool allocates; released objects are reset first.
pub struct Pool<T: Poolable> {
    items: Mutex<Vec<Box<T>>>,
}

impl<T: Poolable> Pool<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn acquire(&self) -> Box<T> {
        self.items.lock().pop().unwrap_or_default()
    }

    pub fn release(&self, mut item: Box<T>) {
        item.reset();
        self.items.lock().push(item);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T: Poolable> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The three engine pools, shared by submit, workers, and the egress
/// processor.
#[derive(Default)]
pub struct Pools {
    pub orders: Pool<Order>,
    pub trades: Pool<Trade>,
    pub results: Pool<MatchResult>,
}

impl Pools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a match result and everything it carries: trades and the
    /// residual taker go back to their own pools before the result itself.
    pub fn release_result(&self, mut result: Box<MatchResult>) {
        for trade in result.trades.drain(..) {
            self.trades.release(trade);
        }
        if let Some(taker) = result.taker.take() {
            self.orders.release(taker);
        }
        self.results.release(result);
    }
}
