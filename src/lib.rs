//! # Spot Matching Engine
//!
//! Limit-order matching core for a spot-exchange venue: per-symbol order
//! books under price-time priority, lock-free ring buffers on ingress and
//! egress, a worker pool, and periodic book snapshots.
//!
//! ## Entry point
//!
//! Use [`MatchingEngine`] as the single entry point: build one from an
//! [`EngineConfig`], [`MatchingEngine::start`] it, then
//! [`MatchingEngine::submit`], [`MatchingEngine::cancel_order`], and the
//! query methods. [`MatchingEngine::stop`] joins every task thread.
//!
//! ## Example
//!
//! ```rust
//! use spot_matching_engine::{EngineConfig, MatchingEngine, Order, OrderType, Side};
//!
//! let config = EngineConfig {
//!     symbols: vec!["BTCUSDT".into()],
//!     worker_count: 1,
//!     persist_enabled: false,
//!     ..Default::default()
//! };
//! let engine = MatchingEngine::new(config);
//! engine.start().unwrap();
//! let ack = engine
//!     .submit(Order {
//!         id: 1,
//!         symbol: "BTCUSDT".into(),
//!         price: 100.0,
//!         quantity: 10,
//!         side: Side::Buy,
//!         order_type: OrderType::Limit,
//!         client_id: "c1".into(),
//!         timestamp: 1,
//!         version: 0,
//!     })
//!     .unwrap();
//! assert_eq!(ack.order_id, 1);
//! engine.stop().unwrap();
//! ```
//!
//! ## Lower-level API
//!
//! [`OrderBook`] is usable directly (with a [`pool::Pools`]) when you manage
//! threading yourself; [`PriceLadder`] and [`RingBuffer`] are the underlying
//! structures.

pub mod engine;
pub mod error;
pub mod events;
pub mod order_book;
pub mod order_gen;
pub mod pool;
pub mod price_ladder;
pub mod price_level;
pub mod ring_buffer;
pub mod snapshot;
pub mod types;
mod worker;

pub use engine::{EngineConfig, MatchingEngine, MAX_SNAPSHOT_DEPTH};
pub use error::EngineError;
pub use events::{EventSink, InMemoryEventSink, NullEventSink};
pub use order_book::OrderBook;
pub use price_ladder::{PriceLadder, PRICE_EPSILON};
pub use price_level::PriceLevel;
pub use ring_buffer::RingBuffer;
pub use snapshot::{FileSnapshotSink, InMemorySnapshotSink, SnapshotSink};
pub use types::{
    BookSnapshot, BookStats, LevelView, MatchResult, Order, OrderAck, OrderState, OrderStatus,
    OrderType, Side, Trade,
};
