//! Downstream consumer of match results.
//!
//! The egress processor forwards every [`MatchResult`] here before releasing
//! it back to the pools; implementations fan out to trade feeds, settlement,
//! or test buffers.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::types::{MatchResult, Trade};

pub trait EventSink: Send + Sync {
    fn on_match(&self, result: &MatchResult);
}

/// Discards everything. Default sink.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn on_match(&self, _result: &MatchResult) {}
}

/// Stores trades and result counts for tests. Clone shares the same buffer.
#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    inner: Arc<Mutex<SinkBuffer>>,
}

#[derive(Default)]
struct SinkBuffer {
    results: usize,
    trades: Vec<Trade>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result_count(&self) -> usize {
        self.inner.lock().results
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.inner.lock().trades.clone()
    }

    pub fn trade_count(&self) -> usize {
        self.inner.lock().trades.len()
    }
}

impl EventSink for InMemoryEventSink {
    fn on_match(&self, result: &MatchResult) {
        let mut buffer = self.inner.lock();
        buffer.results += 1;
        for trade in &result.trades {
            buffer.trades.push((**trade).clone());
        }
    }
}
