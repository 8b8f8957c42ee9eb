//! Core data models: orders, trades, match results, book views, order state.
//!
//! [`Order`] is the ingress message; [`Trade`] and [`MatchResult`] are what
//! matching emits. [`RestingOrder`] is the in-book form of an accepted limit
//! order (shared between a price level's FIFO and the book's order index).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::EngineError;

/// Order side. Wire encoding: buy = 1, sell = 2.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_wire(code: i8) -> Result<Self, EngineError> {
        match code {
            1 => Ok(Side::Buy),
            2 => Ok(Side::Sell),
            _ => Err(EngineError::InvalidOrder("side must be 1 (buy) or 2 (sell)")),
        }
    }

    pub fn wire(self) -> i8 {
        match self {
            Side::Buy => 1,
            Side::Sell => 2,
        }
    }

    /// The side an incoming order takes liquidity from.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl Default for Side {
    fn default() -> Self {
        Side::Buy
    }
}

/// Order type: limit (bounded price, rests if unfilled) or market (crosses
/// the top of book until filled or out of liquidity; residual never rests).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn from_wire(code: i8) -> Result<Self, EngineError> {
        match code {
            1 => Ok(OrderType::Limit),
            2 => Ok(OrderType::Market),
            _ => Err(EngineError::InvalidOrder("type must be 1 (limit) or 2 (market)")),
        }
    }

    pub fn wire(self) -> i8 {
        match self {
            OrderType::Limit => 1,
            OrderType::Market => 2,
        }
    }
}

impl Default for OrderType {
    fn default() -> Self {
        OrderType::Limit
    }
}

/// Incoming order message.
///
/// `quantity` is the original quantity on submit; in the residual order
/// carried by a [`MatchResult`] it has been reduced to the unfilled remainder.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Order {
    pub id: u64,
    pub symbol: String,
    pub price: f64,
    pub quantity: i64,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub client_id: String,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub version: u32,
}

impl Order {
    /// Boundary validation: non-empty symbol, positive quantity, and a
    /// positive price for limit orders. Market prices are ignored.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.symbol.is_empty() {
            return Err(EngineError::InvalidOrder("symbol must not be empty"));
        }
        if self.quantity <= 0 {
            return Err(EngineError::InvalidOrder("quantity must be positive"));
        }
        if self.order_type == OrderType::Limit && self.price <= 0.0 {
            return Err(EngineError::InvalidOrder("limit orders require a positive price"));
        }
        if !self.price.is_finite() {
            return Err(EngineError::InvalidOrder("price must be finite"));
        }
        Ok(())
    }

    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }

    pub fn is_limit(&self) -> bool {
        self.order_type == OrderType::Limit
    }

    pub fn is_market(&self) -> bool {
        self.order_type == OrderType::Market
    }
}

/// In-book form of an accepted limit order. The level FIFO and the book's
/// order index share one instance; `remaining` is the only mutable field.
#[derive(Debug)]
pub struct RestingOrder {
    pub id: u64,
    pub side: Side,
    pub price: f64,
    pub remaining: AtomicI64,
    pub timestamp: i64,
    pub client_id: String,
}

impl RestingOrder {
    pub fn from_order(order: &Order, remaining: i64) -> Self {
        Self {
            id: order.id,
            side: order.side,
            price: order.price,
            remaining: AtomicI64::new(remaining),
            timestamp: order.timestamp,
            client_id: order.client_id.clone(),
        }
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Acquire)
    }
}

/// One execution between a taker and a resting maker. Price is always the
/// maker's price; improvement accrues to the taker.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Trade {
    pub trade_id: u64,
    pub taker_order_id: u64,
    pub maker_order_id: u64,
    pub symbol: String,
    pub price: f64,
    pub quantity: i64,
    pub timestamp: i64,
    pub taker_side: Side,
}

/// Result of matching one order: executed trades plus the residual taker.
#[derive(Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MatchResult {
    pub trades: Vec<Box<Trade>>,
    pub taker: Option<Box<Order>>,
    pub timestamp: i64,
}

impl MatchResult {
    pub fn has_trades(&self) -> bool {
        !self.trades.is_empty()
    }

    pub fn total_filled_qty(&self) -> i64 {
        self.trades.iter().map(|t| t.quantity).sum()
    }
}

/// Externally visible order lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn code(self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Partial => 1,
            OrderStatus::Filled => 2,
            OrderStatus::Cancelled => 3,
            OrderStatus::Rejected => 4,
        }
    }
}

/// Status view kept per submitted order, updated by the egress processor.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OrderState {
    pub order_id: u64,
    pub symbol: String,
    pub status: OrderStatus,
    pub filled_quantity: i64,
    pub original_quantity: i64,
    pub create_time: i64,
}

/// Acknowledgement returned by submit.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OrderAck {
    pub order_id: u64,
    pub status: OrderStatus,
    pub server_time_ms: i64,
}

/// One aggregated price level in a book snapshot.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LevelView {
    pub price: f64,
    pub quantity: i64,
    pub count: usize,
}

/// Depth snapshot of one book, best levels first on both sides.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BookSnapshot {
    pub symbol: String,
    pub bids: Vec<LevelView>,
    pub asks: Vec<LevelView>,
    /// Milliseconds since the Unix epoch.
    pub time: i64,
}

/// Rolling per-book counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BookStats {
    pub orders_processed: u64,
    pub trades_executed: u64,
    pub avg_latency_ns: u64,
    pub last_update_ms: i64,
}

/// Engine clock, nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Engine clock, milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
