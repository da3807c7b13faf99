use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AggregationStore, PeriodicTask};

/// Drops series that were not observed for longer than the TTL.
/// Persisted rows are left alone.
#[derive(Debug, Clone)]
pub struct EvictionSweeper {
    store: Arc<AggregationStore>,
    ttl: Duration,
}

impl EvictionSweeper {
    pub fn new(store: Arc<AggregationStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn sweep(&self) -> usize {
        let evicted = self.store.evict_expired(self.ttl);
        if evicted > 0 {
            debug!(
                evicted,
                remaining = self.store.series_count(),
                "evicted expired series"
            );
        }
        evicted
    }

    pub fn spawn(self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        PeriodicTask::new("eviction", interval, token).spawn(move || {
            self.sweep();
            std::future::ready(())
        })
    }
}
