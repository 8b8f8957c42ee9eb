//! Deterministic synthetic order streams for replay demos, load tests, and
//! property tests. Same config (including seed) produces the same stream.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{Order, OrderType, Side};

/// Generator configuration. Ranges are inclusive.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// RNG seed. Same seed, same order stream.
    pub seed: u64,
    /// Symbols to round over; each order picks one uniformly.
    pub symbols: Vec<String>,
    pub num_orders: usize,
    /// Probability of Buy; Sell otherwise.
    pub buy_ratio: f64,
    /// Probability of Limit; Market otherwise.
    pub limit_ratio: f64,
    /// Price range for limit orders; generated prices land on 0.01 ticks.
    pub price_min: f64,
    pub price_max: f64,
    pub quantity_min: i64,
    pub quantity_max: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            symbols: vec!["BTCUSDT".into()],
            num_orders: 1000,
            buy_ratio: 0.5,
            limit_ratio: 0.9,
            price_min: 95.0,
            price_max: 105.0,
            quantity_min: 1,
            quantity_max: 100,
        }
    }
}

pub struct OrderGenerator {
    rng: StdRng,
    config: GeneratorConfig,
    next_order_id: u64,
    next_timestamp: i64,
}

impl OrderGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            rng,
            config,
            next_order_id: 1,
            next_timestamp: 1,
        }
    }

    /// Generates the next order, advancing ids, timestamps, and RNG state.
    pub fn next_order(&mut self) -> Order {
        let id = self.next_order_id;
        self.next_order_id += 1;
        let timestamp = self.next_timestamp;
        self.next_timestamp += 1;

        let symbol_idx = self.rng.gen_range(0..self.config.symbols.len().max(1));
        let symbol = self.config.symbols[symbol_idx].clone();
        let side = if self.rng.gen::<f64>() < self.config.buy_ratio {
            Side::Buy
        } else {
            Side::Sell
        };
        let is_limit = self.rng.gen::<f64>() < self.config.limit_ratio;
        let price = if is_limit {
            // Whole ticks keep generated orders aggregating onto shared levels.
            let min_ticks = (self.config.price_min * 100.0).round() as i64;
            let max_ticks = (self.config.price_max * 100.0).round() as i64;
            self.rng.gen_range(min_ticks..=max_ticks) as f64 / 100.0
        } else {
            0.0
        };
        let quantity = self
            .rng
            .gen_range(self.config.quantity_min..=self.config.quantity_max);

        Order {
            id,
            symbol,
            price,
            quantity,
            side,
            order_type: if is_limit {
                OrderType::Limit
            } else {
                OrderType::Market
            },
            client_id: format!("gen-{id}"),
            timestamp,
            version: 0,
        }
    }

    pub fn take_orders(&mut self, n: usize) -> Vec<Order> {
        (0..n).map(|_| self.next_order()).collect()
    }

    pub fn all_orders(&mut self) -> Vec<Order> {
        self.take_orders(self.config.num_orders)
    }
}
