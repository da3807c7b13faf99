use super::{MetricLabels, MetricType, SeriesKey, resolve_key};

/// Absolute value of a counter or gauge series, as stored in `metric_values`.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedMetric {
    pub tenant_id: String,
    pub metric_name: String,
    pub metric_type: MetricType,
    pub value: f64,
    /// Canonical (sorted, sanitized) labels.
    pub labels: MetricLabels,
}

impl PersistedMetric {
    pub fn key(&self) -> SeriesKey {
        resolve_key(&self.tenant_id, &self.metric_name, &self.labels)
    }
}

/// Raw row of the `metric_values` table. Decoding is left to the restore
/// loader so that a single bad row can be skipped.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MetricValueRow {
    pub tenant_id: String,
    pub metric_name: String,
    pub metric_type: String,
    pub value: f64,
    pub labels: String,
}
