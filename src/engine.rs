//! The matching engine: per-symbol books and ingress rings, a shared egress
//! ring, worker fan-out, snapshot services, and the order-state view.
//!
//! `submit` and `cancel_order` never block on the workers: submit validates,
//! claims the order id, and enqueues; workers drain the ingress rings and
//! push results to the egress ring; the egress processor applies fills to the
//! state table and forwards results to the event sink. The engine is
//! single-use: construct, `start`, `stop`, discard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use crate::error::EngineError;
use crate::events::{EventSink, NullEventSink};
use crate::order_book::OrderBook;
use crate::pool::Pools;
use crate::ring_buffer::RingBuffer;
use crate::snapshot::{
    run_snapshot_drain, InMemorySnapshotSink, Persister, SnapshotSink, Snapshotter,
    SNAPSHOT_CHANNEL_CAPACITY,
};
use crate::types::{
    now_millis, BookSnapshot, BookStats, MatchResult, Order, OrderAck, OrderState, OrderStatus,
};
use crate::worker::MatchingWorker;

/// Deepest snapshot a query may request.
pub const MAX_SNAPSHOT_DEPTH: usize = 1000;

/// Engine tunables. Defaults match the production deployment profile.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub symbols: Vec<String>,
    pub worker_count: usize,
    pub batch_size: usize,
    /// Kept for deployment manifests; sharding happens per symbol.
    pub order_book_shards: usize,
    pub snapshot_interval: Duration,
    pub persist_enabled: bool,
    pub persist_interval: Duration,
    pub ingress_ring_size: usize,
    pub egress_ring_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".into(), "ETHUSDT".into(), "BNBUSDT".into()],
            worker_count: 32,
            batch_size: 128,
            order_book_shards: 16,
            snapshot_interval: Duration::from_secs(30),
            persist_enabled: true,
            persist_interval: Duration::from_secs(5),
            ingress_ring_size: 65_536,
            egress_ring_size: 1_048_576,
        }
    }
}

/// State shared between the engine facade and its task threads.
pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) books: HashMap<String, Arc<OrderBook>>,
    pub(crate) ingress: HashMap<String, RingBuffer<Order>>,
    pub(crate) egress: RingBuffer<MatchResult>,
    pub(crate) pools: Pools,
    /// Accepted order ids, for idempotent submit.
    pub(crate) processed: DashMap<u64, ()>,
    pub(crate) states: DashMap<u64, OrderState>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) egress_drops: AtomicU64,
    pub(crate) event_sink: Arc<dyn EventSink>,
}

impl EngineShared {
    /// Egress loop: apply results to the state table, forward to the sink,
    /// return everything to the pools.
    pub(crate) fn run_result_processor(&self) {
        info!("result processor started");
        let batch = self.config.batch_size.max(1);
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let results = self.egress.batch_pop(batch);
            if results.is_empty() {
                std::thread::sleep(Duration::from_micros(100));
                continue;
            }
            for result in results {
                self.apply_result(&result);
                self.event_sink.on_match(&result);
                self.pools.release_result(result);
            }
        }
        info!("result processor stopped");
    }

    fn apply_result(&self, result: &MatchResult) {
        for trade in &result.trades {
            self.apply_fill(trade.maker_order_id, trade.quantity);
            self.apply_fill(trade.taker_order_id, trade.quantity);
        }
        // A market order that found no liquidity is rejected, never rested;
        // a partially filled one keeps its Partial state, remainder abandoned.
        if let Some(taker) = &result.taker {
            if taker.is_market() && taker.quantity > 0 {
                if let Some(mut state) = self.states.get_mut(&taker.id) {
                    if state.filled_quantity == 0 {
                        state.status = OrderStatus::Rejected;
                    }
                }
            }
        }
    }

    fn apply_fill(&self, order_id: u64, quantity: i64) {
        if let Some(mut state) = self.states.get_mut(&order_id) {
            state.filled_quantity += quantity;
            if state.status != OrderStatus::Cancelled {
                state.status = if state.filled_quantity >= state.original_quantity {
                    OrderStatus::Filled
                } else {
                    OrderStatus::Partial
                };
            }
        }
    }
}

enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

pub struct MatchingEngine {
    shared: Arc<EngineShared>,
    snapshot_sink: Arc<dyn SnapshotSink>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    lifecycle: Mutex<Lifecycle>,
}

impl MatchingEngine {
    /// Engine with a null event sink and an in-memory snapshot sink.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_sinks(
            config,
            Arc::new(NullEventSink),
            Arc::new(InMemorySnapshotSink::new()),
        )
    }

    pub fn with_sinks(
        config: EngineConfig,
        event_sink: Arc<dyn EventSink>,
        snapshot_sink: Arc<dyn SnapshotSink>,
    ) -> Self {
        let trade_seq = Arc::new(AtomicU64::new(1));
        let mut books = HashMap::new();
        let mut ingress = HashMap::new();
        for symbol in &config.symbols {
            books.insert(
                symbol.clone(),
                Arc::new(OrderBook::with_trade_sequence(
                    symbol.clone(),
                    Arc::clone(&trade_seq),
                )),
            );
            ingress.insert(symbol.clone(), RingBuffer::new(config.ingress_ring_size));
        }
        let egress = RingBuffer::new(config.egress_ring_size);
        Self {
            shared: Arc::new(EngineShared {
                config,
                books,
                ingress,
                egress,
                pools: Pools::new(),
                processed: DashMap::new(),
                states: DashMap::new(),
                shutdown: AtomicBool::new(false),
                egress_drops: AtomicU64::new(0),
                event_sink,
            }),
            snapshot_sink,
            handles: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Launches workers, snapshot services, and the egress processor.
    /// The engine is single-use: starting twice, or again after `stop`, fails.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Err(EngineError::AlreadyStarted);
        }

        let mut handles = self.handles.lock();
        let worker_count = self.shared.config.worker_count.max(1);
        for worker_id in 0..worker_count {
            let shared = Arc::clone(&self.shared);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("matcher-{worker_id}"))
                    .spawn(move || MatchingWorker::new(worker_id, shared).run())
                    .expect("spawn worker thread"),
            );
        }

        let (tx, rx) = mpsc::sync_channel(SNAPSHOT_CHANNEL_CAPACITY);
        {
            let shared = Arc::clone(&self.shared);
            let snapshotter = Snapshotter::new(
                self.shared.books.clone(),
                self.shared.config.snapshot_interval,
                tx,
            );
            handles.push(
                std::thread::Builder::new()
                    .name("snapshotter".into())
                    .spawn(move || snapshotter.run(&shared.shutdown))
                    .expect("spawn snapshotter thread"),
            );
        }
        {
            let shared = Arc::clone(&self.shared);
            let sink = Arc::clone(&self.snapshot_sink);
            handles.push(
                std::thread::Builder::new()
                    .name("snapshot-drain".into())
                    .spawn(move || run_snapshot_drain(rx, sink, &shared.shutdown))
                    .expect("spawn snapshot drain thread"),
            );
        }
        if self.shared.config.persist_enabled {
            let shared = Arc::clone(&self.shared);
            let persister = Persister::new(
                self.shared.books.clone(),
                Arc::clone(&self.snapshot_sink),
                self.shared.config.persist_interval,
            );
            handles.push(
                std::thread::Builder::new()
                    .name("persister".into())
                    .spawn(move || persister.run(&shared.shutdown))
                    .expect("spawn persister thread"),
            );
        }
        {
            let shared = Arc::clone(&self.shared);
            handles.push(
                std::thread::Builder::new()
                    .name("egress".into())
                    .spawn(move || shared.run_result_processor())
                    .expect("spawn egress thread"),
            );
        }

        *lifecycle = Lifecycle::Running;
        info!(
            symbols = self.shared.books.len(),
            workers = worker_count,
            "matching engine started"
        );
        Ok(())
    }

    /// Signals cancellation and waits for every task thread to exit.
    pub fn stop(&self) -> Result<(), EngineError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if !matches!(*lifecycle, Lifecycle::Running) {
                return Err(EngineError::NotStarted);
            }
            *lifecycle = Lifecycle::Stopped;
        }
        self.shared.shutdown.store(true, Ordering::Release);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        info!("matching engine stopped");
        Ok(())
    }

    /// Validates and enqueues one order. Duplicate ids are rejected
    /// idempotently; an unknown symbol or a full ingress ring reverts the
    /// idempotency claim so the caller may retry.
    pub fn submit(&self, order: Order) -> Result<OrderAck, EngineError> {
        order.validate()?;
        let shared = &self.shared;

        if shared.processed.insert(order.id, ()).is_some() {
            return Err(EngineError::DuplicateOrder(order.id));
        }
        let Some(ring) = shared.ingress.get(&order.symbol) else {
            shared.processed.remove(&order.id);
            return Err(EngineError::SymbolNotFound(order.symbol));
        };

        let order_id = order.id;
        shared.states.insert(
            order_id,
            OrderState {
                order_id,
                symbol: order.symbol.clone(),
                status: OrderStatus::Pending,
                filled_quantity: 0,
                original_quantity: order.quantity,
                create_time: order.timestamp,
            },
        );

        let mut pooled = shared.pools.orders.acquire();
        *pooled = order;
        if let Err(rejected) = ring.push(pooled) {
            let symbol = rejected.symbol.clone();
            shared.pools.orders.release(rejected);
            shared.processed.remove(&order_id);
            shared.states.remove(&order_id);
            return Err(EngineError::QueueFull(symbol));
        }

        Ok(OrderAck {
            order_id,
            status: OrderStatus::Pending,
            server_time_ms: now_millis(),
        })
    }

    /// Cancels a resting order. Linearizable against matching on the book's
    /// lock: it either succeeds (the order was still resting) or reports
    /// `OrderNotFound` (already filled or never rested).
    pub fn cancel_order(&self, order_id: u64, symbol: &str) -> Result<(), EngineError> {
        let book = self
            .shared
            .books
            .get(symbol)
            .ok_or_else(|| EngineError::SymbolNotFound(symbol.to_string()))?;
        if !book.cancel(order_id) {
            return Err(EngineError::OrderNotFound(order_id));
        }
        if let Some(mut state) = self.shared.states.get_mut(&order_id) {
            state.status = OrderStatus::Cancelled;
        }
        info!(order_id, symbol, "order cancelled");
        Ok(())
    }

    /// Depth snapshot of one book, clamped to [`MAX_SNAPSHOT_DEPTH`].
    pub fn order_book(&self, symbol: &str, depth: usize) -> Result<BookSnapshot, EngineError> {
        let book = self
            .shared
            .books
            .get(symbol)
            .ok_or_else(|| EngineError::SymbolNotFound(symbol.to_string()))?;
        Ok(book.snapshot(depth.clamp(1, MAX_SNAPSHOT_DEPTH)))
    }

    pub fn order_state(&self, order_id: u64) -> Option<OrderState> {
        self.shared.states.get(&order_id).map(|s| s.value().clone())
    }

    pub fn book_stats(&self, symbol: &str) -> Result<BookStats, EngineError> {
        self.shared
            .books
            .get(symbol)
            .map(|book| book.stats())
            .ok_or_else(|| EngineError::SymbolNotFound(symbol.to_string()))
    }

    /// Pending orders in a symbol's ingress ring.
    pub fn queue_size(&self, symbol: &str) -> Result<usize, EngineError> {
        self.shared
            .ingress
            .get(symbol)
            .map(|ring| ring.len())
            .ok_or_else(|| EngineError::SymbolNotFound(symbol.to_string()))
    }

    pub fn symbols(&self) -> Vec<String> {
        self.shared.books.keys().cloned().collect()
    }

    /// Match results dropped because the egress ring was full. Non-zero is
    /// an operational alarm: those trades never reached downstream sinks.
    pub fn egress_drops(&self) -> u64 {
        self.shared.egress_drops.load(Ordering::Acquire)
    }
}
