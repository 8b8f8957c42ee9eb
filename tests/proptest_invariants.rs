//! Property-based and deterministic invariant tests.
//!
//! Replays generated order streams straight into an [`OrderBook`] (no
//! threads, so outcomes are a pure function of the stream) and asserts
//! quantity conservation, an uncrossed book, and deterministic replay.

use proptest::prelude::*;

use spot_matching_engine::order_gen::{GeneratorConfig, OrderGenerator};
use spot_matching_engine::pool::Pools;
use spot_matching_engine::{Order, OrderBook};

struct ReplayOutcome {
    trades: usize,
    traded_qty: i64,
    abandoned_qty: i64,
    best_bid: Option<f64>,
    best_ask: Option<f64>,
}

fn replay(book: &OrderBook, pools: &Pools, orders: Vec<Order>) -> ReplayOutcome {
    let mut outcome = ReplayOutcome {
        trades: 0,
        traded_qty: 0,
        abandoned_qty: 0,
        best_bid: None,
        best_ask: None,
    };
    for order in orders {
        let is_market = order.is_market();
        let result = book.match_order(Box::new(order), pools).unwrap();
        outcome.trades += result.trades.len();
        outcome.traded_qty += result.total_filled_qty();
        if is_market {
            if let Some(taker) = &result.taker {
                outcome.abandoned_qty += taker.quantity;
            }
        }
        pools.release_result(result);

        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            assert!(bid < ask, "crossed book: bid {bid} >= ask {ask}");
        }
    }
    outcome.best_bid = book.best_bid();
    outcome.best_ask = book.best_ask();
    outcome
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// For any (seed, num_orders) in range: total submitted quantity equals
    /// twice the traded quantity (each trade fills both sides) plus resting
    /// quantity plus abandoned market residue, and the book stays consistent.
    #[test]
    fn quantity_is_conserved_after_replay(seed in 0u64..100_000u64, num_orders in 10usize..150usize) {
        let orders = OrderGenerator::new(GeneratorConfig {
            seed,
            num_orders,
            ..Default::default()
        })
        .all_orders();
        let inflow: i64 = orders.iter().map(|o| o.quantity).sum();

        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        let outcome = replay(&book, &pools, orders);

        let resting = book.bid_volume() + book.ask_volume();
        prop_assert_eq!(inflow, 2 * outcome.traded_qty + resting + outcome.abandoned_qty);
        prop_assert!(book.validate());
    }

    /// Every trade has positive quantity and a price taken from a resting
    /// level, never negative.
    #[test]
    fn no_negative_quantities(seed in 0u64..100_000u64) {
        let orders = OrderGenerator::new(GeneratorConfig {
            seed,
            num_orders: 80,
            ..Default::default()
        })
        .all_orders();
        let book = OrderBook::new("BTCUSDT");
        let pools = Pools::new();
        for order in orders {
            let result = book.match_order(Box::new(order), &pools).unwrap();
            for trade in &result.trades {
                prop_assert!(trade.quantity > 0, "trade quantity must be positive");
                prop_assert!(trade.price > 0.0, "trade price must be positive");
            }
            if let Some(taker) = &result.taker {
                prop_assert!(taker.quantity >= 0, "residual must be non-negative");
            }
            pools.release_result(result);
        }
    }
}

/// Deterministic replay: same stream, same outcome.
#[test]
fn deterministic_replay_same_seed_same_outcome() {
    let config = GeneratorConfig {
        seed: 999,
        num_orders: 120,
        ..Default::default()
    };

    let first_book = OrderBook::new("BTCUSDT");
    let pools = Pools::new();
    let first = replay(
        &first_book,
        &pools,
        OrderGenerator::new(config.clone()).all_orders(),
    );

    let second_book = OrderBook::new("BTCUSDT");
    let second = replay(
        &second_book,
        &pools,
        OrderGenerator::new(config).all_orders(),
    );

    assert_eq!(first.trades, second.trades);
    assert_eq!(first.traded_qty, second.traded_qty);
    assert_eq!(first.abandoned_qty, second.abandoned_qty);
    assert_eq!(first.best_bid, second.best_bid);
    assert_eq!(first.best_ask, second.best_ask);
    assert_eq!(first_book.bid_volume(), second_book.bid_volume());
    assert_eq!(first_book.ask_volume(), second_book.ask_volume());
}

/// Cancelling every resting order empties the book and returns each order's
/// remaining quantity to nothing: full cancel correctness over a random book.
#[test]
fn cancel_all_resting_orders_empties_book() {
    let orders = OrderGenerator::new(GeneratorConfig {
        seed: 4242,
        num_orders: 100,
        ..Default::default()
    })
    .all_orders();
    let ids: Vec<u64> = orders.iter().map(|o| o.id).collect();

    let book = OrderBook::new("BTCUSDT");
    let pools = Pools::new();
    for order in orders {
        let result = book.match_order(Box::new(order), &pools).unwrap();
        pools.release_result(result);
    }

    for id in ids {
        // Only orders still resting cancel successfully.
        let was_resting = book.contains_order(id);
        assert_eq!(book.cancel(id), was_resting);
    }
    assert_eq!(book.bid_volume(), 0);
    assert_eq!(book.ask_volume(), 0);
    assert_eq!(book.resting_order_count(), 0);
    assert!(book.best_bid().is_none());
    assert!(book.best_ask().is_none());
    assert!(book.validate());
}
