//! Engine error taxonomy.
//!
//! Submit/cancel/query failures surface to the caller; lifecycle misuse is
//! fatal to the caller of the lifecycle op. [`EngineError::InvariantViolation`]
//! means book accounting broke: the worker that hit it halts and signals
//! engine shutdown rather than keep mutating a corrupt book.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("duplicate order: {0}")]
    DuplicateOrder(u64),

    #[error("input queue full for symbol: {0}")]
    QueueFull(String),

    #[error("invalid order: {0}")]
    InvalidOrder(&'static str),

    #[error("order not found: {0}")]
    OrderNotFound(u64),

    #[error("matching engine already started")]
    AlreadyStarted,

    #[error("matching engine not started")]
    NotStarted,

    #[error("output queue full")]
    OutputQueueFull,

    #[error("snapshot: {0}")]
    Snapshot(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),
}
