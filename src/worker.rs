//! Matching workers: drain ingress rings, run matching, push results.
//!
//! Every worker rounds over all symbols, splitting its batch budget across
//! them. Workers on the same symbol serialize on that book's write lock, so
//! per-symbol throughput scales with symbol count rather than worker count;
//! per-symbol FIFO processing holds only with one worker per symbol.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::engine::EngineShared;

/// Idle pause when a full round over all symbols found nothing.
const IDLE_SLEEP: Duration = Duration::from_micros(50);

pub(crate) struct MatchingWorker {
    id: usize,
    shared: Arc<EngineShared>,
    batch_size: usize,
}

impl MatchingWorker {
    pub(crate) fn new(id: usize, shared: Arc<EngineShared>) -> Self {
        let batch_size = shared.config.batch_size.max(1);
        Self {
            id,
            shared,
            batch_size,
        }
    }

    pub(crate) fn run(&self) {
        info!(worker = self.id, "matching worker started");
        loop {
            if self.shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            let processed = self.process_batch();
            if processed == 0 {
                std::thread::sleep(IDLE_SLEEP);
            } else {
                debug!(worker = self.id, processed, "batch processed");
            }
        }
        info!(worker = self.id, "matching worker stopped");
    }

    fn process_batch(&self) -> usize {
        let mut processed = 0;
        for (symbol, ring) in &self.shared.ingress {
            if processed >= self.batch_size {
                break;
            }
            let orders = ring.batch_pop(self.batch_size - processed);
            if orders.is_empty() {
                continue;
            }
            let Some(book) = self.shared.books.get(symbol) else {
                continue;
            };
            for taker in orders {
                match book.match_order(taker, &self.shared.pools) {
                    Ok(result) => {
                        processed += 1;
                        if let Err(result) = self.shared.egress.push(result) {
                            // Trades in a dropped result never reach the
                            // downstream sinks.
                            self.shared.egress_drops.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                worker = self.id,
                                symbol = %symbol,
                                "egress queue full, dropping match result"
                            );
                            self.shared.pools.release_result(result);
                        }
                    }
                    Err(err) => {
                        error!(
                            worker = self.id,
                            symbol = %symbol,
                            error = %err,
                            "book accounting broken, halting worker and signalling shutdown"
                        );
                        self.shared.shutdown.store(true, Ordering::Release);
                        return processed;
                    }
                }
            }
        }
        processed
    }
}
