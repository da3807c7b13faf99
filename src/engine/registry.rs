use dashmap::DashMap;
use std::sync::Arc;

use super::EngineError;
use crate::datamodel::{MetricDefinition, MetricType, sanitize::sanitize_metric_name};

/// Tenant id of definitions shared by every tenant.
pub const ANY_TENANT: &str = "*";

/// Server-side metric configuration, queried on every observation.
pub trait MetricTypeResolver: Send + Sync {
    fn definition(&self, tenant_id: &str, metric_name: &str) -> Option<Arc<MetricDefinition>>;

    fn effective_type(&self, tenant_id: &str, metric_name: &str) -> Option<MetricType> {
        self.definition(tenant_id, metric_name)
            .map(|definition| definition.metric_type)
    }
}

/// No server-side configuration: declared types are used as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetricConfig;

impl MetricTypeResolver for NoMetricConfig {
    fn definition(&self, _tenant_id: &str, _metric_name: &str) -> Option<Arc<MetricDefinition>> {
        None
    }
}

/// In-memory metric configuration keyed by `(tenant, sanitized name)`.
/// Tenant specific definitions win over `*` definitions.
#[derive(Debug)]
pub struct MetricConfigRegistry {
    definitions: DashMap<(String, String), Arc<MetricDefinition>>,
    max_metric_name_length: usize,
}

impl MetricConfigRegistry {
    pub fn new(max_metric_name_length: usize) -> Self {
        Self {
            definitions: DashMap::new(),
            max_metric_name_length,
        }
    }

    pub fn from_definitions(
        definitions: impl IntoIterator<Item = MetricDefinition>,
        max_metric_name_length: usize,
    ) -> Result<Self, EngineError> {
        let registry = Self::new(max_metric_name_length);
        for definition in definitions {
            registry.upsert(definition)?;
        }
        Ok(registry)
    }

    pub fn upsert(&self, mut definition: MetricDefinition) -> Result<(), EngineError> {
        if definition.tenant_id.trim().is_empty() {
            return Err(EngineError::validation("definition tenant_id must not be empty"));
        }
        definition.name = sanitize_metric_name(&definition.name, self.max_metric_name_length);

        if let Some(buckets) = &definition.buckets {
            validate_buckets(buckets)?;
        }
        if let Some(quantiles) = &definition.quantiles {
            validate_quantiles(quantiles)?;
        }

        self.definitions.insert(
            (definition.tenant_id.clone(), definition.name.clone()),
            Arc::new(definition),
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl MetricTypeResolver for MetricConfigRegistry {
    fn definition(&self, tenant_id: &str, metric_name: &str) -> Option<Arc<MetricDefinition>> {
        self.definitions
            .get(&(tenant_id.to_string(), metric_name.to_string()))
            .or_else(|| {
                self.definitions
                    .get(&(ANY_TENANT.to_string(), metric_name.to_string()))
            })
            .map(|entry| entry.value().clone())
    }
}

fn validate_buckets(buckets: &[f64]) -> Result<(), EngineError> {
    if buckets.is_empty() {
        return Err(EngineError::validation("histogram buckets must not be empty"));
    }
    if buckets.iter().any(|b| !b.is_finite() || *b <= 0.0) {
        return Err(EngineError::validation(
            "histogram buckets must be finite and positive",
        ));
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(EngineError::validation(
            "histogram buckets must be strictly ascending",
        ));
    }
    Ok(())
}

fn validate_quantiles(quantiles: &[f64]) -> Result<(), EngineError> {
    if quantiles.is_empty() {
        return Err(EngineError::validation("summary quantiles must not be empty"));
    }
    if quantiles.iter().any(|q| !(0.0..=1.0).contains(q)) {
        return Err(EngineError::validation(
            "summary quantiles must be between 0 and 1",
        ));
    }
    Ok(())
}
