use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::store::LedgerStore;

/// One housekeeping pass: compact the WAL once enough appends have piled up,
/// and drop day locks nobody is using. Returns whether a compaction ran.
pub async fn compact_if_needed(store: &LedgerStore, engine: &Engine, threshold: u64) -> bool {
    let released = engine.release_idle_locks();
    if released > 0 {
        debug!("released {released} idle day locks");
    }
    metrics::gauge!(crate::observability::DAY_LOCKS_ACTIVE).set(engine.day_lock_count() as f64);

    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!(
                "compacted WAL after {appends} appends ({} bookings)",
                store.booking_count()
            );
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that periodically runs [`compact_if_needed`].
pub async fn run_compactor(store: Arc<LedgerStore>, engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_needed(&store, &engine, threshold).await;
    }
}
