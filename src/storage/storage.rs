use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;

use crate::datamodel::{MetricValueRow, PersistedMetric};

#[async_trait]
pub trait StorageInstance: Send + Sync + Debug {
    async fn create_or_migrate(&self) -> Result<()>;

    /// Upserts every record in one transaction, keyed on
    /// `(tenant_id, metric_name, labels)`.
    async fn upsert_metric_values(&self, records: &[PersistedMetric]) -> Result<()>;

    /// Raw rows, decoded by the restore loader.
    async fn load_metric_values(&self) -> Result<Vec<MetricValueRow>>;

    /// Returns the number of deleted rows.
    async fn delete_tenant(&self, tenant_id: &str) -> Result<u64>;

    async fn health_check(&self) -> Result<()>;
}
