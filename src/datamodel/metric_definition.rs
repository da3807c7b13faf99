use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::MetricType;

/// Server-side configuration of a metric. It is the source of truth for the
/// metric type, whatever clients declare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MetricDefinition {
    /// `*` matches every tenant.
    pub tenant_id: String,
    pub name: String,
    pub metric_type: MetricType,
    pub description: Option<String>,
    /// Histogram upper bounds, ascending and positive. `+Inf` is implicit.
    pub buckets: Option<Vec<f64>>,
    /// Summary quantiles in `[0, 1]`.
    pub quantiles: Option<Vec<f64>>,
}

impl MetricDefinition {
    pub fn new(tenant_id: impl Into<String>, name: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            name: name.into(),
            metric_type,
            description: None,
            buckets: None,
            quantiles: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    pub fn with_quantiles(mut self, quantiles: Vec<f64>) -> Self {
        self.quantiles = Some(quantiles);
        self
    }
}
