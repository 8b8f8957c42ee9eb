//! Ordered price → level map backed by a skip list.
//!
//! One structure serves both sides of a book: the comparator is parameterized
//! by a direction flag, so a descending ladder (bids) and an ascending ladder
//! (asks) both yield their best price as the first node after the header.
//! Prices compare under an absolute tolerance: two prices within
//! [`PRICE_EPSILON`] land on the same level.
//!
//! Nodes live in a slab with `u32` forward links (index 0 is the header) and
//! a free list, which keeps the classic forward-pointer algorithm in safe
//! code. Structural reads and writes go through one read-write lock; the
//! level generator's RNG has its own small lock so concurrent inserts do not
//! race on its state.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::price_level::PriceLevel;

/// Absolute tolerance for price equality.
pub const PRICE_EPSILON: f64 = 1e-10;

/// Default skip-list height bound.
pub const DEFAULT_MAX_HEIGHT: usize = 16;

/// Probability of promoting a node one more layer.
const PROMOTE_PROBABILITY: f32 = 0.5;

const NIL: u32 = u32::MAX;
const HEAD: u32 = 0;

/// True when the two prices are the same level key.
pub fn price_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= PRICE_EPSILON
}

struct Node {
    price: f64,
    /// `None` only for the header and freed nodes.
    level: Option<Arc<PriceLevel>>,
    forward: Vec<u32>,
}

struct LadderCore {
    nodes: Vec<Node>,
    free: Vec<u32>,
    /// Highest layer index currently populated.
    height: usize,
    len: usize,
}

pub struct PriceLadder {
    core: RwLock<LadderCore>,
    rng: Mutex<SmallRng>,
    descending: bool,
    max_height: usize,
}

impl PriceLadder {
    /// `descending = true` for the bid side (best = highest price),
    /// `false` for the ask side (best = lowest price).
    pub fn new(descending: bool) -> Self {
        Self::with_max_height(descending, DEFAULT_MAX_HEIGHT)
    }

    pub fn with_max_height(descending: bool, max_height: usize) -> Self {
        let max_height = max_height.max(1);
        let header = Node {
            price: 0.0,
            level: None,
            forward: vec![NIL; max_height + 1],
        };
        Self {
            core: RwLock::new(LadderCore {
                nodes: vec![header],
                free: Vec::new(),
                height: 0,
                len: 0,
            }),
            rng: Mutex::new(SmallRng::from_entropy()),
            descending,
            max_height,
        }
    }

    /// Strict ladder ordering: does `a` sort before `b`? Epsilon-equal prices
    /// never sort before one another.
    fn sorts_before(&self, a: f64, b: f64) -> bool {
        if price_eq(a, b) {
            return false;
        }
        if self.descending {
            a > b
        } else {
            a < b
        }
    }

    fn random_height(&self) -> usize {
        let mut rng = self.rng.lock();
        let mut height = 0;
        while rng.gen::<f32>() < PROMOTE_PROBABILITY && height < self.max_height {
            height += 1;
        }
        height
    }

    /// Walks down from the top layer; `update[i]` is the rightmost node on
    /// layer `i` that sorts before `price`.
    fn find_update(&self, core: &LadderCore, price: f64) -> Vec<u32> {
        let mut update = vec![HEAD; self.max_height + 1];
        let mut current = HEAD;
        for layer in (0..=core.height).rev() {
            loop {
                let next = core.nodes[current as usize].forward[layer];
                if next != NIL && self.sorts_before(core.nodes[next as usize].price, price) {
                    current = next;
                } else {
                    break;
                }
            }
            update[layer] = current;
        }
        update
    }

    /// Inserts a level at `price`; an existing level at an epsilon-equal
    /// price is replaced in place.
    pub fn insert(&self, price: f64, level: Arc<PriceLevel>) {
        let mut core = self.core.write();
        let update = self.find_update(&core, price);

        let next = core.nodes[update[0] as usize].forward[0];
        if next != NIL && price_eq(core.nodes[next as usize].price, price) {
            core.nodes[next as usize].level = Some(level);
            return;
        }

        let node_height = self.random_height();
        let mut update = update;
        if node_height > core.height {
            for layer in core.height + 1..=node_height {
                update[layer] = HEAD;
            }
            core.height = node_height;
        }

        let idx = match core.free.pop() {
            Some(idx) => {
                let node = &mut core.nodes[idx as usize];
                node.price = price;
                node.level = Some(level);
                node.forward.clear();
                node.forward.resize(node_height + 1, NIL);
                idx
            }
            None => {
                core.nodes.push(Node {
                    price,
                    level: Some(level),
                    forward: vec![NIL; node_height + 1],
                });
                (core.nodes.len() - 1) as u32
            }
        };

        for layer in 0..=node_height {
            let prev = update[layer] as usize;
            let succ = core.nodes[prev].forward[layer];
            core.nodes[idx as usize].forward[layer] = succ;
            core.nodes[prev].forward[layer] = idx;
        }
        core.len += 1;
    }

    /// Removes and returns the level at `price`, if present.
    pub fn remove(&self, price: f64) -> Option<Arc<PriceLevel>> {
        let mut core = self.core.write();
        let update = self.find_update(&core, price);

        let target = core.nodes[update[0] as usize].forward[0];
        if target == NIL || !price_eq(core.nodes[target as usize].price, price) {
            return None;
        }

        for layer in 0..=core.height {
            if core.nodes[update[layer] as usize].forward[layer] != target {
                break;
            }
            let succ = core.nodes[target as usize].forward[layer];
            core.nodes[update[layer] as usize].forward[layer] = succ;
        }
        while core.height > 0 && core.nodes[HEAD as usize].forward[core.height] == NIL {
            core.height -= 1;
        }

        let node = &mut core.nodes[target as usize];
        let level = node.level.take();
        node.forward.clear();
        core.free.push(target);
        core.len -= 1;
        level
    }

    pub fn get(&self, price: f64) -> Option<Arc<PriceLevel>> {
        let core = self.core.read();
        let update = self.find_update(&core, price);
        let next = core.nodes[update[0] as usize].forward[0];
        if next != NIL && price_eq(core.nodes[next as usize].price, price) {
            core.nodes[next as usize].level.clone()
        } else {
            None
        }
    }

    /// The best level: first node after the header. O(1).
    pub fn best(&self) -> Option<Arc<PriceLevel>> {
        let core = self.core.read();
        let first = core.nodes[HEAD as usize].forward[0];
        if first == NIL {
            None
        } else {
            core.nodes[first as usize].level.clone()
        }
    }

    /// The worst level: full bottom-layer walk. Diagnostics only.
    pub fn worst(&self) -> Option<Arc<PriceLevel>> {
        let core = self.core.read();
        let mut current = core.nodes[HEAD as usize].forward[0];
        if current == NIL {
            return None;
        }
        loop {
            let next = core.nodes[current as usize].forward[0];
            if next == NIL {
                return core.nodes[current as usize].level.clone();
            }
            current = next;
        }
    }

    /// Up to `n` levels in ladder order, best first.
    pub fn top(&self, n: usize) -> Vec<Arc<PriceLevel>> {
        let core = self.core.read();
        let mut levels = Vec::with_capacity(n.min(core.len));
        let mut current = core.nodes[HEAD as usize].forward[0];
        while current != NIL && levels.len() < n {
            if let Some(level) = &core.nodes[current as usize].level {
                levels.push(Arc::clone(level));
            }
            current = core.nodes[current as usize].forward[0];
        }
        levels
    }

    /// Visits every level in ladder order until the callback returns false.
    pub fn for_each(&self, mut f: impl FnMut(&PriceLevel) -> bool) {
        let core = self.core.read();
        let mut current = core.nodes[HEAD as usize].forward[0];
        while current != NIL {
            if let Some(level) = &core.nodes[current as usize].level {
                if !f(level) {
                    break;
                }
            }
            current = core.nodes[current as usize].forward[0];
        }
    }

    /// Visits levels from the first whose price does not sort before `price`.
    pub fn for_each_from(&self, price: f64, mut f: impl FnMut(&PriceLevel) -> bool) {
        let core = self.core.read();
        let update = self.find_update(&core, price);
        let mut current = core.nodes[update[0] as usize].forward[0];
        while current != NIL {
            if let Some(level) = &core.nodes[current as usize].level {
                if !f(level) {
                    break;
                }
            }
            current = core.nodes[current as usize].forward[0];
        }
    }

    /// Visits levels from `from` through `to`, both in ladder order
    /// (for a descending ladder `from` is the higher price).
    pub fn for_each_between(&self, from: f64, to: f64, mut f: impl FnMut(&PriceLevel) -> bool) {
        let core = self.core.read();
        let update = self.find_update(&core, from);
        let mut current = core.nodes[update[0] as usize].forward[0];
        while current != NIL {
            let node = &core.nodes[current as usize];
            if self.sorts_before(to, node.price) {
                break;
            }
            if let Some(level) = &node.level {
                if !f(level) {
                    break;
                }
            }
            current = node.forward[0];
        }
    }

    /// Number of levels.
    pub fn len(&self) -> usize {
        self.core.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of level aggregates across the ladder.
    pub fn total_qty(&self) -> i64 {
        let mut total = 0;
        self.for_each(|level| {
            total += level.total_qty();
            true
        });
        total
    }

    /// Total resting orders across the ladder.
    pub fn order_count(&self) -> usize {
        let mut count = 0;
        self.for_each(|level| {
            count += level.order_count();
            true
        });
        count
    }

    /// Structural check: every layer strictly ordered, bottom layer count
    /// matching `len`.
    pub fn validate(&self) -> bool {
        let core = self.core.read();
        for layer in 0..=core.height {
            let mut prev: Option<f64> = None;
            let mut current = core.nodes[HEAD as usize].forward[layer];
            while current != NIL {
                let price = core.nodes[current as usize].price;
                if let Some(prev) = prev {
                    if !self.sorts_before(prev, price) {
                        return false;
                    }
                }
                prev = Some(price);
                current = core.nodes[current as usize].forward[layer];
            }
        }
        let mut count = 0;
        let mut current = core.nodes[HEAD as usize].forward[0];
        while current != NIL {
            count += 1;
            current = core.nodes[current as usize].forward[0];
        }
        count == core.len
    }

    /// Drops every level and resets the structure.
    pub fn clear(&self) {
        let mut core = self.core.write();
        let header = Node {
            price: 0.0,
            level: None,
            forward: vec![NIL; self.max_height + 1],
        };
        core.nodes = vec![header];
        core.free.clear();
        core.height = 0;
        core.len = 0;
    }
}
