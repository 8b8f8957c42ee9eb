//! Operational binary: start the engine from environment configuration,
//! replay a synthetic order stream, report per-book results, shut down.
//!
//! Environment: `SYMBOLS` (comma-separated), `WORKER_COUNT`, `BATCH_SIZE`,
//! `SNAPSHOT_DIR`, `REPLAY_ORDERS`, `REPLAY_SEED`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use spot_matching_engine::order_gen::{GeneratorConfig, OrderGenerator};
use spot_matching_engine::snapshot::book_key;
use spot_matching_engine::{
    BookSnapshot, EngineConfig, EngineError, FileSnapshotSink, MatchingEngine, NullEventSink,
    SnapshotSink,
};

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn config_from_env() -> EngineConfig {
    let mut config = EngineConfig::default();
    if let Ok(symbols) = std::env::var("SYMBOLS") {
        let symbols: Vec<String> = symbols
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !symbols.is_empty() {
            config.symbols = symbols;
        }
    }
    config.worker_count = env_parse("WORKER_COUNT", config.worker_count);
    config.batch_size = env_parse("BATCH_SIZE", config.batch_size);
    config
}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();
    if let Err(err) = run() {
        eprintln!("fatal: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), EngineError> {
    let config = config_from_env();
    let snapshot_dir = std::env::var("SNAPSHOT_DIR").unwrap_or_else(|_| "./snapshots".into());
    let sink = Arc::new(FileSnapshotSink::new(snapshot_dir));

    // Previous snapshots are advisory: report them, start with empty books.
    for symbol in &config.symbols {
        if let Some(data) = sink.get(&book_key(symbol))? {
            match serde_json::from_slice::<BookSnapshot>(&data) {
                Ok(snapshot) => info!(
                    symbol = %symbol,
                    bid_levels = snapshot.bids.len(),
                    ask_levels = snapshot.asks.len(),
                    "found previous snapshot"
                ),
                Err(err) => warn!(symbol = %symbol, error = %err, "unreadable snapshot"),
            }
        }
    }

    let engine = MatchingEngine::with_sinks(config.clone(), Arc::new(NullEventSink), sink);
    engine.start()?;

    let num_orders: usize = env_parse("REPLAY_ORDERS", 10_000);
    let seed: u64 = env_parse("REPLAY_SEED", 42);
    let orders = OrderGenerator::new(GeneratorConfig {
        seed,
        symbols: config.symbols.clone(),
        num_orders,
        ..Default::default()
    })
    .all_orders();

    info!(orders = orders.len(), "replaying synthetic stream");
    let started = Instant::now();
    let mut rejected = 0usize;
    for order in orders {
        if let Err(err) = engine.submit(order) {
            rejected += 1;
            if !matches!(err, EngineError::QueueFull(_)) {
                warn!(error = %err, "submit failed");
            }
        }
    }

    // Let the workers drain every ingress ring before reporting.
    loop {
        let backlog: usize = config
            .symbols
            .iter()
            .map(|s| engine.queue_size(s).unwrap_or(0))
            .sum();
        if backlog == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(100));

    for symbol in &config.symbols {
        let snapshot = engine.order_book(symbol, 10)?;
        let stats = engine.book_stats(symbol)?;
        info!(
            symbol = %symbol,
            bid_levels = snapshot.bids.len(),
            ask_levels = snapshot.asks.len(),
            orders = stats.orders_processed,
            trades = stats.trades_executed,
            avg_latency_ns = stats.avg_latency_ns,
            "book after replay"
        );
    }
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        rejected,
        egress_drops = engine.egress_drops(),
        "replay finished"
    );

    engine.stop()
}
