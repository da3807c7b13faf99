use crate::datamodel::{MetricDefinition, MetricType};
use serde::Deserialize;
use serde_inline_default::serde_inline_default;

/// A metric definition as written in `settings.toml`:
///
/// ```toml
/// [[metrics]]
/// tenant_id = "acme"
/// name = "checkout_latency_seconds"
/// type = "histogram"
/// buckets = [0.1, 0.5, 1.0]
/// ```
#[serde_inline_default]
#[derive(Debug, Deserialize, Clone)]
pub struct MetricDefinitionConfig {
    /// `*` applies the definition to every tenant.
    #[serde_inline_default("*".to_string())]
    pub tenant_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub description: Option<String>,
    pub buckets: Option<Vec<f64>>,
    pub quantiles: Option<Vec<f64>>,
}

impl From<MetricDefinitionConfig> for MetricDefinition {
    fn from(config: MetricDefinitionConfig) -> Self {
        MetricDefinition {
            tenant_id: config.tenant_id,
            name: config.name,
            metric_type: config.metric_type,
            description: config.description,
            buckets: config.buckets,
            quantiles: config.quantiles,
        }
    }
}
