//! Book snapshots and their delivery to a pluggable sink.
//!
//! Two periodic services run next to the workers: the [`Snapshotter`] takes
//! shallow snapshots on a long interval and hands them to the sink through a
//! bounded channel (overflow drops with a warning; snapshots are advisory),
//! and the [`Persister`] writes deep snapshots plus stats straight to the
//! sink on a short interval, once more on shutdown.
//!
//! Restore is parse-only: a depth snapshot aggregates away the per-order
//! FIFOs, so it cannot re-animate a book and is returned for diagnostics.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::order_book::OrderBook;
use crate::types::{now_millis, BookSnapshot};

/// Depth captured by the periodic snapshotter.
const SNAPSHOT_DEPTH: usize = 100;
/// Depth captured by the persister.
const PERSIST_DEPTH: usize = 1000;
/// Bounded channel between the snapshotter and the sink drain.
pub(crate) const SNAPSHOT_CHANNEL_CAPACITY: usize = 1000;

/// Key for a persisted book snapshot.
pub fn book_key(symbol: &str) -> String {
    format!("matching:orderbook:{symbol}")
}

/// Key for the companion stats blob.
pub fn stats_key(symbol: &str) -> String {
    format!("matching:orderbook:{symbol}:stats")
}

/// Keyed byte store for snapshot blobs. The medium is the caller's choice.
pub trait SnapshotSink: Send + Sync {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), EngineError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError>;
}

/// One serialized book snapshot on its way to the sink.
pub struct SnapshotBlob {
    pub symbol: String,
    pub data: Vec<u8>,
    pub timestamp: i64,
    pub version: u64,
}

/// Sleeps until `interval` has elapsed, waking early on shutdown.
/// Returns true when the shutdown flag fired.
pub(crate) fn wait_interval(shutdown: &AtomicBool, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        if shutdown.load(Ordering::Acquire) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return shutdown.load(Ordering::Acquire);
        }
        let remaining = deadline - now;
        std::thread::sleep(remaining.min(Duration::from_millis(20)));
    }
}

/// Periodically serializes shallow snapshots into the bounded channel.
pub struct Snapshotter {
    books: HashMap<String, Arc<OrderBook>>,
    interval: Duration,
    tx: SyncSender<SnapshotBlob>,
}

impl Snapshotter {
    pub fn new(
        books: HashMap<String, Arc<OrderBook>>,
        interval: Duration,
        tx: SyncSender<SnapshotBlob>,
    ) -> Self {
        Self { books, interval, tx }
    }

    pub fn run(&self, shutdown: &AtomicBool) {
        info!("snapshotter started");
        loop {
            if wait_interval(shutdown, self.interval) {
                break;
            }
            self.take_snapshots();
        }
        info!("snapshotter stopped");
    }

    fn take_snapshots(&self) {
        for (symbol, book) in &self.books {
            let Some(blob) = Self::take(symbol, book) else {
                continue;
            };
            match self.tx.try_send(blob) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(symbol = %symbol, "snapshot channel full, dropping snapshot");
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    fn take(symbol: &str, book: &OrderBook) -> Option<SnapshotBlob> {
        let snapshot = book.snapshot(SNAPSHOT_DEPTH);
        let data = match serde_json::to_vec(&snapshot) {
            Ok(data) => data,
            Err(err) => {
                warn!(symbol = %symbol, error = %err, "failed to serialize snapshot");
                return None;
            }
        };
        Some(SnapshotBlob {
            symbol: symbol.to_string(),
            data,
            timestamp: now_millis(),
            version: book.version(),
        })
    }
}

/// Drains the snapshot channel into the sink until shutdown and the channel
/// are both done.
pub(crate) fn run_snapshot_drain(
    rx: Receiver<SnapshotBlob>,
    sink: Arc<dyn SnapshotSink>,
    shutdown: &AtomicBool,
) {
    loop {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(blob) => {
                if let Err(err) = sink.put(&book_key(&blob.symbol), &blob.data) {
                    warn!(symbol = %blob.symbol, error = %err, "snapshot sink write failed");
                } else {
                    debug!(
                        symbol = %blob.symbol,
                        bytes = blob.data.len(),
                        version = blob.version,
                        "snapshot stored"
                    );
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Writes deep snapshots and stats straight to the sink on a short interval,
/// with a final pass on shutdown.
pub struct Persister {
    books: HashMap<String, Arc<OrderBook>>,
    sink: Arc<dyn SnapshotSink>,
    interval: Duration,
}

impl Persister {
    pub fn new(
        books: HashMap<String, Arc<OrderBook>>,
        sink: Arc<dyn SnapshotSink>,
        interval: Duration,
    ) -> Self {
        Self { books, sink, interval }
    }

    pub fn run(&self, shutdown: &AtomicBool) {
        info!("persister started");
        loop {
            if wait_interval(shutdown, self.interval) {
                break;
            }
            self.persist_all();
        }
        // Last write so a clean shutdown leaves fresh state behind.
        self.persist_all();
        info!("persister stopped");
    }

    pub fn persist_all(&self) {
        for (symbol, book) in &self.books {
            if let Err(err) = self.persist_book(symbol, book) {
                warn!(symbol = %symbol, error = %err, "failed to persist order book");
            }
        }
    }

    fn persist_book(&self, symbol: &str, book: &OrderBook) -> Result<(), EngineError> {
        let snapshot = book.snapshot(PERSIST_DEPTH);
        let data =
            serde_json::to_vec(&snapshot).map_err(|e| EngineError::Snapshot(e.to_string()))?;
        self.sink.put(&book_key(symbol), &data)?;

        let stats =
            serde_json::to_vec(&book.stats()).map_err(|e| EngineError::Snapshot(e.to_string()))?;
        self.sink.put(&stats_key(symbol), &stats)?;

        debug!(symbol = %symbol, bytes = data.len(), "order book persisted");
        Ok(())
    }

    /// Reads back a persisted snapshot. Advisory: the parsed depth view has
    /// no per-order FIFO identities, so it never re-animates a live book.
    pub fn restore(&self, symbol: &str) -> Result<Option<BookSnapshot>, EngineError> {
        let Some(data) = self.sink.get(&book_key(symbol))? else {
            return Ok(None);
        };
        let snapshot: BookSnapshot =
            serde_json::from_slice(&data).map_err(|e| EngineError::Snapshot(e.to_string()))?;
        Ok(Some(snapshot))
    }
}

/// One file per key under a directory.
pub struct FileSnapshotSink {
    dir: PathBuf,
}

impl FileSnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys use ':' separators; keep filenames portable.
        self.dir.join(key.replace(':', "_"))
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| EngineError::Snapshot(e.to_string()))?;
        std::fs::write(self.path_for(key), data).map_err(|e| EngineError::Snapshot(e.to_string()))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        match std::fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::Snapshot(e.to_string())),
        }
    }
}

/// Keyed in-memory store for tests.
#[derive(Clone, Default)]
pub struct InMemorySnapshotSink {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemorySnapshotSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl SnapshotSink for InMemorySnapshotSink {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), EngineError> {
        self.entries.lock().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.entries.lock().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pools;
    use crate::types::{Order, OrderType, Side};

    fn book_with_orders() -> Arc<OrderBook> {
        let book = Arc::new(OrderBook::new("BTCUSDT"));
        let pools = Pools::new();
        for (id, side, price, qty) in [
            (1, Side::Buy, 99.0, 10),
            (2, Side::Buy, 98.0, 5),
            (3, Side::Sell, 101.0, 8),
        ] {
            let order = Box::new(Order {
                id,
                symbol: "BTCUSDT".into(),
                price,
                quantity: qty,
                side,
                order_type: OrderType::Limit,
                client_id: format!("c{id}"),
                timestamp: id as i64,
                version: 0,
            });
            book.match_order(order, &pools).unwrap();
        }
        book
    }

    #[test]
    fn keys_follow_the_store_scheme() {
        assert_eq!(book_key("BTCUSDT"), "matching:orderbook:BTCUSDT");
        assert_eq!(stats_key("BTCUSDT"), "matching:orderbook:BTCUSDT:stats");
    }

    #[test]
    fn persister_writes_snapshot_and_stats_and_restores() {
        let book = book_with_orders();
        let sink = Arc::new(InMemorySnapshotSink::new());
        let mut books = HashMap::new();
        books.insert("BTCUSDT".to_string(), Arc::clone(&book));
        let persister = Persister::new(books, sink.clone(), Duration::from_secs(5));

        persister.persist_all();
        assert_eq!(sink.len(), 2);

        let restored = persister.restore("BTCUSDT").unwrap().unwrap();
        assert_eq!(restored.symbol, "BTCUSDT");
        assert_eq!(restored.bids.len(), 2);
        assert_eq!(restored.bids[0].price, 99.0);
        assert_eq!(restored.asks.len(), 1);

        let stats = sink.get(&stats_key("BTCUSDT")).unwrap().unwrap();
        let stats: crate::types::BookStats = serde_json::from_slice(&stats).unwrap();
        assert_eq!(stats.orders_processed, 3);
    }

    #[test]
    fn restore_missing_symbol_is_none() {
        let sink = Arc::new(InMemorySnapshotSink::new());
        let persister = Persister::new(HashMap::new(), sink, Duration::from_secs(5));
        assert!(persister.restore("ETHUSDT").unwrap().is_none());
    }

    #[test]
    fn snapshotter_sends_blobs_and_drops_on_full_channel() {
        let book = book_with_orders();
        let mut books = HashMap::new();
        books.insert("BTCUSDT".to_string(), Arc::clone(&book));
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let snapshotter = Snapshotter::new(books, Duration::from_secs(30), tx);

        // Two rounds against a capacity-1 channel: second snapshot drops.
        snapshotter.take_snapshots();
        snapshotter.take_snapshots();

        let blob = rx.try_recv().unwrap();
        assert_eq!(blob.symbol, "BTCUSDT");
        let snapshot: BookSnapshot = serde_json::from_slice(&blob.data).unwrap();
        assert_eq!(snapshot.bids.len(), 2);
        assert_eq!(blob.version, book.version());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn file_sink_round_trips_and_misses_cleanly() {
        let dir = std::env::temp_dir().join(format!("matchcore-sink-{}", std::process::id()));
        let sink = FileSnapshotSink::new(&dir);
        sink.put(&book_key("BTCUSDT"), b"payload").unwrap();
        assert_eq!(sink.get(&book_key("BTCUSDT")).unwrap().unwrap(), b"payload");
        assert!(sink.get(&book_key("ETHUSDT")).unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn wait_interval_returns_early_on_shutdown() {
        let shutdown = AtomicBool::new(true);
        let started = Instant::now();
        assert!(wait_interval(&shutdown, Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
