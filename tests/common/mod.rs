#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use promhub::datamodel::{MetricValueRow, PersistedMetric};
use promhub::engine::{
    AggregationStore, EngineSettings, ManualClock, MetricConfigRegistry, MetricTypeResolver,
};
use promhub::persistence::{PersistenceBatcher, PersistenceSink};
use promhub::storage::StorageInstance;
use promhub::storage::sqlite::SqliteStorage;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub mod http;

/// Start of the manual clock used by every test, 2026-01-01T00:00:00Z.
pub const START_MS: u64 = 1_767_225_600_000;

/// A fresh in-memory SQLite database with the schema applied.
pub async fn memory_storage() -> Result<Arc<SqliteStorage>> {
    let storage = SqliteStorage::connect("sqlite::memory:").await?;
    storage.create_or_migrate().await?;
    Ok(Arc::new(storage))
}

/// Store, batcher and storage wired together the way the server does it,
/// with a clock that only moves when the test says so.
pub struct TestEngine {
    pub clock: Arc<ManualClock>,
    pub store: Arc<AggregationStore>,
    pub batcher: Arc<PersistenceBatcher>,
    pub storage: Arc<dyn StorageInstance>,
}

impl TestEngine {
    pub async fn new() -> Result<Self> {
        let storage: Arc<dyn StorageInstance> = memory_storage().await?;
        Self::with_storage(storage, EngineSettings::default(), MetricConfigRegistry::new(200))
    }

    pub fn with_storage(
        storage: Arc<dyn StorageInstance>,
        settings: EngineSettings,
        registry: MetricConfigRegistry,
    ) -> Result<Self> {
        let clock = Arc::new(ManualClock::new(START_MS));
        let batcher = Arc::new(PersistenceBatcher::from_settings(storage.clone(), &settings));
        let sink: Arc<dyn PersistenceSink> = batcher.clone();
        let resolver: Arc<dyn MetricTypeResolver> = Arc::new(registry);
        let store = Arc::new(AggregationStore::new(
            settings,
            clock.clone(),
            resolver,
            Some(sink),
        ));
        Ok(Self {
            clock,
            store,
            batcher,
            storage,
        })
    }

    /// Simulates a restart: same storage, empty memory.
    pub fn restart(&self) -> Result<Self> {
        Self::with_storage(
            self.storage.clone(),
            self.store.settings().clone(),
            MetricConfigRegistry::new(200),
        )
    }

    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }
}

/// Storage that can be switched off to simulate an unreachable database.
#[derive(Debug)]
pub struct FlakyStorage {
    inner: Arc<SqliteStorage>,
    down: AtomicBool,
}

impl FlakyStorage {
    pub async fn new() -> Result<Self> {
        Ok(Self {
            inner: memory_storage().await?,
            down: AtomicBool::new(false),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageInstance for FlakyStorage {
    async fn create_or_migrate(&self) -> Result<()> {
        self.check()?;
        self.inner.create_or_migrate().await
    }

    async fn upsert_metric_values(&self, records: &[PersistedMetric]) -> Result<()> {
        self.check()?;
        self.inner.upsert_metric_values(records).await
    }

    async fn load_metric_values(&self) -> Result<Vec<MetricValueRow>> {
        self.check()?;
        self.inner.load_metric_values().await
    }

    async fn delete_tenant(&self, tenant_id: &str) -> Result<u64> {
        self.check()?;
        self.inner.delete_tenant(tenant_id).await
    }

    async fn health_check(&self) -> Result<()> {
        self.check()?;
        self.inner.health_check().await
    }
}
