use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::PersistenceSink;
use crate::datamodel::{PersistedMetric, SeriesKey};
use crate::engine::{EngineError, EngineSettings, PeriodicTask};
use crate::storage::StorageInstance;

#[derive(Debug, Clone)]
struct PendingRecord {
    record: PersistedMetric,
    /// Failed flushes this value went through.
    attempts: u32,
}

/// Coalesces counter and gauge values per series and writes them in batches.
#[derive(Debug)]
pub struct PersistenceBatcher {
    storage: Arc<dyn StorageInstance>,
    pending: DashMap<SeriesKey, PendingRecord>,
    flush_timeout: Duration,
    max_retries: u32,
    /// Flushes never overlap each other nor a tenant deletion.
    flush_lock: Mutex<()>,
}

impl PersistenceBatcher {
    pub fn new(
        storage: Arc<dyn StorageInstance>,
        flush_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            storage,
            pending: DashMap::new(),
            flush_timeout,
            max_retries: max_retries.max(1),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn from_settings(storage: Arc<dyn StorageInstance>, settings: &EngineSettings) -> Self {
        Self::new(storage, settings.flush_timeout, settings.max_flush_retries)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn discard_tenant(&self, tenant_id: &str) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| pending.record.tenant_id != tenant_id);
        before.saturating_sub(self.pending.len())
    }

    /// Drops the unflushed values of a tenant, then its persisted rows.
    /// Returns both counts.
    ///
    /// Runs under the flush lock: a flush holding values of the tenant either
    /// lands before the rows are deleted or re-queues them before they are
    /// discarded.
    pub async fn delete_tenant(&self, tenant_id: &str) -> anyhow::Result<(usize, u64)> {
        let _guard = self.flush_lock.lock().await;
        let discarded = self.discard_tenant(tenant_id);
        let rows = self.storage.delete_tenant(tenant_id).await?;
        Ok((discarded, rows))
    }

    /// Writes every pending value in one upsert. On failure the values go
    /// back to the queue unless a newer value arrived meanwhile, and values
    /// that failed `max_retries` times are dropped.
    pub async fn flush(&self) -> Result<usize, EngineError> {
        let _guard = self.flush_lock.lock().await;

        let keys: Vec<SeriesKey> = self
            .pending
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let drained: Vec<(SeriesKey, PendingRecord)> = keys
            .into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .collect();
        if drained.is_empty() {
            return Ok(0);
        }

        let records: Vec<PersistedMetric> = drained
            .iter()
            .map(|(_, pending)| pending.record.clone())
            .collect();

        let outcome = tokio::time::timeout(
            self.flush_timeout,
            self.storage.upsert_metric_values(&records),
        )
        .await;
        let reason = match outcome {
            Ok(Ok(())) => {
                debug!(records = records.len(), "flushed metric values");
                return Ok(records.len());
            }
            Ok(Err(err)) => format!("{:#}", err),
            Err(_) => format!("flush timed out after {:?}", self.flush_timeout),
        };

        let mut dropped = 0;
        for (key, mut pending) in drained {
            pending.attempts += 1;
            if pending.attempts >= self.max_retries {
                dropped += 1;
                error!(
                    series = %key,
                    value = pending.record.value,
                    attempts = pending.attempts,
                    "Dropping metric value after repeated flush failures"
                );
                continue;
            }
            self.pending.entry(key).or_insert(pending);
        }
        warn!(
            records = records.len(),
            dropped,
            "Flush failed, values re-queued: {}",
            reason
        );
        Err(EngineError::PersistenceUnavailable(reason))
    }

    /// Flushes every `interval` and once more after `token` is cancelled.
    pub fn spawn(self: Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let batcher = self.clone();
            PeriodicTask::new("persistence", interval, token)
                .run(move || {
                    let batcher = batcher.clone();
                    async move {
                        // Already logged by flush.
                        let _ = batcher.flush().await;
                    }
                })
                .await;

            match self.flush().await {
                Ok(count) => info!(count, "Final flush done"),
                Err(err) => error!("Final flush failed: {}", err),
            }
        })
    }
}

impl PersistenceSink for PersistenceBatcher {
    fn enqueue(&self, record: PersistedMetric) {
        self.pending
            .insert(record.key(), PendingRecord { record, attempts: 0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{MetricLabels, MetricType, MetricValueRow};
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FakeStorage {
        fail: AtomicBool,
        hang: AtomicBool,
        calls: AtomicUsize,
        written: std::sync::Mutex<Vec<PersistedMetric>>,
    }

    impl FakeStorage {
        fn tenant_rows(&self, tenant_id: &str) -> usize {
            self.written
                .lock()
                .unwrap()
                .iter()
                .filter(|record| record.tenant_id == tenant_id)
                .count()
        }
    }

    #[async_trait]
    impl StorageInstance for FakeStorage {
        async fn create_or_migrate(&self) -> Result<()> {
            Ok(())
        }

        async fn upsert_metric_values(&self, records: &[PersistedMetric]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                bail!("connection refused");
            }
            self.written.lock().unwrap().extend_from_slice(records);
            Ok(())
        }

        async fn load_metric_values(&self) -> Result<Vec<MetricValueRow>> {
            Ok(Vec::new())
        }

        async fn delete_tenant(&self, tenant_id: &str) -> Result<u64> {
            let mut written = self.written.lock().unwrap();
            let before = written.len();
            written.retain(|record| record.tenant_id != tenant_id);
            Ok((before - written.len()) as u64)
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn record(tenant: &str, value: f64) -> PersistedMetric {
        PersistedMetric {
            tenant_id: tenant.to_string(),
            metric_name: "jobs_total".to_string(),
            metric_type: MetricType::Counter,
            value,
            labels: MetricLabels::new(),
        }
    }

    fn batcher(storage: Arc<FakeStorage>, max_retries: u32) -> PersistenceBatcher {
        PersistenceBatcher::new(storage, Duration::from_secs(5), max_retries)
    }

    #[tokio::test]
    async fn test_last_write_wins_within_a_window() {
        let storage = Arc::new(FakeStorage::default());
        let batcher = batcher(storage.clone(), 5);
        batcher.enqueue(record("acme", 1.0));
        batcher.enqueue(record("acme", 2.0));
        batcher.enqueue(record("globex", 9.0));
        assert_eq!(batcher.pending_len(), 2);

        assert_eq!(batcher.flush().await, Ok(2));
        assert_eq!(batcher.pending_len(), 0);
        let written = storage.written.lock().unwrap();
        assert!(written.iter().any(|r| r.tenant_id == "acme" && r.value == 2.0));
        assert!(!written.iter().any(|r| r.value == 1.0));
    }

    #[tokio::test]
    async fn test_empty_flush_skips_storage() {
        let storage = Arc::new(FakeStorage::default());
        let batcher = batcher(storage.clone(), 5);
        assert_eq!(batcher.flush().await, Ok(0));
        assert_eq!(storage.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_without_overwriting_newer_values() {
        let storage = Arc::new(FakeStorage::default());
        storage.fail.store(true, Ordering::SeqCst);
        let batcher = batcher(storage.clone(), 5);

        batcher.enqueue(record("acme", 1.0));
        assert!(matches!(
            batcher.flush().await,
            Err(EngineError::PersistenceUnavailable(_))
        ));
        assert_eq!(batcher.pending_len(), 1);

        // A newer value arrives before the next flush.
        batcher.enqueue(record("acme", 5.0));
        storage.fail.store(false, Ordering::SeqCst);
        assert_eq!(batcher.flush().await, Ok(1));
        assert_eq!(storage.written.lock().unwrap()[0].value, 5.0);
    }

    #[tokio::test]
    async fn test_records_are_dropped_after_max_retries() {
        let storage = Arc::new(FakeStorage::default());
        storage.fail.store(true, Ordering::SeqCst);
        let batcher = batcher(storage.clone(), 3);
        batcher.enqueue(record("acme", 1.0));

        for _ in 0..2 {
            assert!(batcher.flush().await.is_err());
            assert_eq!(batcher.pending_len(), 1);
        }
        assert!(batcher.flush().await.is_err());
        assert_eq!(batcher.pending_len(), 0);
        assert_eq!(storage.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_timeout() {
        let storage = Arc::new(FakeStorage::default());
        storage.hang.store(true, Ordering::SeqCst);
        let batcher = batcher(storage.clone(), 5);
        batcher.enqueue(record("acme", 1.0));

        let err = batcher.flush().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(batcher.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_discard_tenant() {
        let storage = Arc::new(FakeStorage::default());
        let batcher = batcher(storage, 5);
        batcher.enqueue(record("acme", 1.0));
        batcher.enqueue(record("globex", 1.0));
        assert_eq!(batcher.discard_tenant("acme"), 1);
        assert_eq!(batcher.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_tenant_waits_for_a_flush_in_progress() {
        let storage = Arc::new(FakeStorage::default());
        storage.hang.store(true, Ordering::SeqCst);
        let batcher = Arc::new(PersistenceBatcher::new(
            storage.clone(),
            Duration::from_secs(7200),
            5,
        ));
        batcher.enqueue(record("acme", 1.0));
        batcher.enqueue(record("globex", 1.0));

        let flushing = tokio::spawn({
            let batcher = batcher.clone();
            async move { batcher.flush().await }
        });
        while storage.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(batcher.pending_len(), 0);

        let deleting = tokio::spawn({
            let batcher = batcher.clone();
            async move { batcher.delete_tenant("acme").await }
        });
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!deleting.is_finished());

        // The stalled upsert completes and writes both tenants
        assert_eq!(flushing.await.unwrap(), Ok(2));
        let (discarded, rows) = deleting.await.unwrap().unwrap();
        assert_eq!((discarded, rows), (0, 1));
        assert_eq!(storage.tenant_rows("acme"), 0);
        assert_eq!(storage.tenant_rows("globex"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_tenant_discards_values_requeued_by_a_failed_flush() {
        let storage = Arc::new(FakeStorage::default());
        storage.hang.store(true, Ordering::SeqCst);
        storage.fail.store(true, Ordering::SeqCst);
        let batcher = Arc::new(batcher(storage.clone(), 5));
        batcher.enqueue(record("acme", 1.0));

        let flushing = tokio::spawn({
            let batcher = batcher.clone();
            async move { batcher.flush().await }
        });
        while storage.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let deleting = tokio::spawn({
            let batcher = batcher.clone();
            async move { batcher.delete_tenant("acme").await }
        });

        // The flush times out and puts the value back, then the deletion drops it
        assert!(flushing.await.unwrap().is_err());
        assert_eq!(deleting.await.unwrap().unwrap(), (1, 0));
        assert_eq!(batcher.pending_len(), 0);

        storage.hang.store(false, Ordering::SeqCst);
        storage.fail.store(false, Ordering::SeqCst);
        assert_eq!(batcher.flush().await, Ok(0));
        assert_eq!(storage.tenant_rows("acme"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_and_final_flush() {
        let storage = Arc::new(FakeStorage::default());
        let batcher = Arc::new(batcher(storage.clone(), 5));
        let token = CancellationToken::new();
        let handle = batcher
            .clone()
            .spawn(Duration::from_secs(10), token.clone());

        batcher.enqueue(record("acme", 1.0));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(storage.written.lock().unwrap().len(), 1);

        batcher.enqueue(record("acme", 2.0));
        token.cancel();
        handle.await.unwrap();
        assert_eq!(batcher.pending_len(), 0);
        assert_eq!(storage.written.lock().unwrap().last().unwrap().value, 2.0);
    }
}
