use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::observability;
use crate::store::MemoryStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Compact the journal once at least `threshold` records were appended
/// since the last compaction. Returns whether it compacted.
pub async fn compact_if_due(store: &MemoryStore, threshold: u64) -> bool {
    if !store.is_durable() {
        return false;
    }
    let appends = store.journal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact_journal().await {
        Ok(()) => {
            metrics::counter!(observability::JOURNAL_COMPACTIONS_TOTAL).increment(1);
            info!(appends, "journal compacted");
            true
        }
        Err(e) => {
            tracing::warn!("journal compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps the journal short.
pub async fn run_compactor(store: Arc<MemoryStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}
