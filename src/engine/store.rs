use dashmap::{DashMap, mapref::entry::Entry, mapref::one::Ref};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use utoipa::ToSchema;

use super::state::{Series, SeriesShape, SeriesState};
use super::{Clock, EngineError, EngineSettings, MetricTypeResolver};
use crate::datamodel::{
    MetricDefinition, MetricLabels, MetricLabelsExt, MetricType, Observation, PersistedMetric,
    SeriesKey, resolve_key, sanitize::sanitize_metric_name,
};
use crate::persistence::PersistenceSink;

#[derive(Debug, Default)]
struct TenantSeries {
    series: DashMap<SeriesKey, Series>,
    /// Type fixed for each metric name the first time it was seen.
    types: DashMap<String, MetricType>,
}

/// Identity of the series an observation resolves to.
struct NewSeries<'a> {
    key: SeriesKey,
    name: String,
    labels: MetricLabels,
    definition: Option<&'a MetricDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedResult {
    pub key: SeriesKey,
    pub metric_type: MetricType,
    /// New absolute value of a counter or gauge.
    pub value: Option<f64>,
    /// The declared type was overridden by configuration or an earlier type.
    pub coerced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ItemOutcome {
    pub index: usize,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchOutcome {
    pub accepted: usize,
    pub rejected: usize,
    pub results: Vec<ItemOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TenantStats {
    pub total_series: usize,
    pub by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleSnapshot {
    Value(f64),
    Histogram {
        /// `(upper bound, cumulative count)` without the `+Inf` bucket.
        buckets: Vec<(f64, u64)>,
        sum: f64,
        count: u64,
    },
    Summary {
        quantiles: Vec<(f64, f64)>,
        sum: f64,
        count: u64,
    },
}

/// Read-only copy of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub tenant_id: String,
    pub name: String,
    pub metric_type: MetricType,
    pub labels: MetricLabels,
    pub help: Option<String>,
    pub sample: SampleSnapshot,
}

impl From<&SeriesState> for SampleSnapshot {
    fn from(state: &SeriesState) -> Self {
        match state {
            SeriesState::Counter(value) | SeriesState::Gauge(value) => {
                SampleSnapshot::Value(*value)
            }
            SeriesState::Histogram(histogram) => SampleSnapshot::Histogram {
                buckets: histogram
                    .boundaries
                    .iter()
                    .copied()
                    .zip(histogram.counts.iter().copied())
                    .collect(),
                sum: histogram.sum,
                count: histogram.count,
            },
            SeriesState::Summary(summary) => SampleSnapshot::Summary {
                quantiles: summary.quantile_values(),
                sum: summary.sum,
                count: summary.count,
            },
        }
    }
}

/// In-memory series of every tenant.
///
/// Tenants map to their own series map. A writer keeps the shared guard of
/// its tenant entry for the whole update, so an empty tenant can only be
/// removed when no write is in flight. Series updates never await.
pub struct AggregationStore {
    tenants: DashMap<String, TenantSeries>,
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    resolver: Arc<dyn MetricTypeResolver>,
    sink: Option<Arc<dyn PersistenceSink>>,
}

impl fmt::Debug for AggregationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationStore")
            .field("tenants", &self.tenants.len())
            .field("settings", &self.settings)
            .field("clock", &self.clock)
            .field("persistence", &self.sink.is_some())
            .finish()
    }
}

impl AggregationStore {
    pub fn new(
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
        resolver: Arc<dyn MetricTypeResolver>,
        sink: Option<Arc<dyn PersistenceSink>>,
    ) -> Self {
        Self {
            tenants: DashMap::new(),
            settings,
            clock,
            resolver,
            sink,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn tenant(&self, tenant_id: &str) -> Ref<'_, String, TenantSeries> {
        if let Some(tenant) = self.tenants.get(tenant_id) {
            return tenant;
        }
        self.tenants
            .entry(tenant_id.to_string())
            .or_default()
            .downgrade()
    }

    /// Applies one observation. On error nothing was mutated.
    pub fn apply(
        &self,
        tenant_id: &str,
        observation: &Observation,
    ) -> Result<AppliedResult, EngineError> {
        if tenant_id.trim().is_empty() {
            return Err(EngineError::validation("tenant_id must not be blank"));
        }
        if observation.metric_name.trim().is_empty() {
            return Err(EngineError::validation("metric name must not be blank"));
        }
        if !observation.value.is_finite() {
            return Err(EngineError::Validation(format!(
                "value must be finite, got {}",
                observation.value
            )));
        }

        let name = sanitize_metric_name(
            &observation.metric_name,
            self.settings.max_metric_name_length,
        );
        let labels = observation
            .labels
            .canonicalize(self.settings.max_label_count)?;
        let definition = self.resolver.definition(tenant_id, &name);
        let key = resolve_key(tenant_id, &name, &labels);
        let now_ms = self.clock.now_ms();

        let result = {
            let tenant = self.tenant(tenant_id);
            self.apply_to_tenant(
                tenant_id,
                &tenant,
                observation,
                NewSeries {
                    key: key.clone(),
                    name,
                    labels,
                    definition: definition.as_deref(),
                },
                now_ms,
            )
        };
        let (metric_type, value) = match result {
            Ok(applied) => applied,
            Err(err) => {
                // A rejected first observation must not leave its tenant behind.
                self.tenants
                    .remove_if(tenant_id, |_, tenant| tenant.series.is_empty());
                return Err(err);
            }
        };

        let coerced = metric_type != observation.metric_type;
        if coerced {
            debug!(
                tenant_id,
                key = %key,
                declared = %observation.metric_type,
                effective = %metric_type,
                "observation coerced to the series type"
            );
        }

        Ok(AppliedResult {
            key,
            metric_type,
            value,
            coerced,
        })
    }

    /// Updates an existing series, or creates it.
    ///
    /// The type of a new name is fixed while its `types` entry is locked, so
    /// concurrent first writes of a name always agree on the type. Lock
    /// order is `types` then `series`.
    fn apply_to_tenant(
        &self,
        tenant_id: &str,
        tenant: &TenantSeries,
        observation: &Observation,
        new: NewSeries<'_>,
        now_ms: u64,
    ) -> Result<(MetricType, Option<f64>), EngineError> {
        if let Some(mut series) = tenant.series.get_mut(&new.key) {
            let value = series.apply(observation.value, observation.operation, &self.settings)?;
            series.last_updated_ms = now_ms;
            self.enqueue(tenant_id, &series, value);
            return Ok((series.metric_type(), value));
        }

        let type_entry = tenant.types.entry(new.name.clone());
        let metric_type = match (&new.definition, &type_entry) {
            (Some(definition), _) => definition.metric_type,
            (None, Entry::Occupied(pinned)) => *pinned.get(),
            (None, Entry::Vacant(_)) => observation.metric_type,
        };

        let applied = match tenant.series.entry(new.key) {
            Entry::Occupied(mut occupied) => {
                let series = occupied.get_mut();
                let value =
                    series.apply(observation.value, observation.operation, &self.settings)?;
                series.last_updated_ms = now_ms;
                self.enqueue(tenant_id, series, value);
                (series.metric_type(), value)
            }
            Entry::Vacant(vacant) => {
                check_reserved_labels(metric_type, &new.labels)?;
                let shape = SeriesShape {
                    metric_type,
                    buckets: new
                        .definition
                        .and_then(|definition| definition.buckets.as_deref()),
                    quantiles: new
                        .definition
                        .and_then(|definition| definition.quantiles.as_deref()),
                };
                let mut series = Series::new(new.name, new.labels, shape, &self.settings, now_ms);
                let value =
                    series.apply(observation.value, observation.operation, &self.settings)?;
                self.enqueue(tenant_id, &series, value);
                vacant.insert(series);
                (metric_type, value)
            }
        };

        if let Entry::Vacant(vacant) = type_entry {
            vacant.insert(applied.0);
        }
        Ok(applied)
    }

    /// Runs while the series guard is held, so a pending record is never
    /// older than the in-memory value.
    fn enqueue(&self, tenant_id: &str, series: &Series, value: Option<f64>) {
        let (Some(sink), Some(value)) = (&self.sink, value) else {
            return;
        };
        sink.enqueue(PersistedMetric {
            tenant_id: tenant_id.to_string(),
            metric_name: series.name.clone(),
            metric_type: series.metric_type(),
            value,
            labels: series.labels.clone(),
        });
    }

    /// Applies each observation independently.
    pub fn observe_batch(&self, tenant_id: &str, observations: &[Observation]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for (index, observation) in observations.iter().enumerate() {
            match self.apply(tenant_id, observation) {
                Ok(_) => {
                    outcome.accepted += 1;
                    outcome.results.push(ItemOutcome {
                        index,
                        accepted: true,
                        reason: None,
                    });
                }
                Err(err) => {
                    outcome.rejected += 1;
                    outcome.results.push(ItemOutcome {
                        index,
                        accepted: false,
                        reason: Some(err.to_string()),
                    });
                }
            }
        }
        outcome
    }

    /// Sets a counter or gauge to a persisted absolute value. Nothing is
    /// sent to persistence, and seeding the same record twice is a no-op.
    pub fn seed(&self, record: &PersistedMetric) -> Result<(), EngineError> {
        if record.tenant_id.trim().is_empty() || record.metric_name.trim().is_empty() {
            return Err(EngineError::restore_row("blank tenant or metric name"));
        }
        if !record.metric_type.is_persisted() {
            return Err(EngineError::restore_row(format!(
                "{} values are not persisted",
                record.metric_type
            )));
        }
        if !record.value.is_finite() {
            return Err(EngineError::restore_row(format!(
                "non-finite value {}",
                record.value
            )));
        }

        let name = sanitize_metric_name(&record.metric_name, self.settings.max_metric_name_length);
        let labels = record
            .labels
            .canonicalize(self.settings.max_label_count)
            .map_err(|err| EngineError::restore_row(err.to_string()))?;

        if let Some(configured) = self.resolver.effective_type(&record.tenant_id, &name) {
            if configured != record.metric_type {
                return Err(type_conflict(&name, configured, record.metric_type));
            }
        }

        let now_ms = self.clock.now_ms();
        let result = {
            let tenant = self.tenant(&record.tenant_id);
            self.seed_tenant(&tenant, record, name, labels, now_ms)
        };

        if result.is_err() {
            self.tenants
                .remove_if(&record.tenant_id, |_, tenant| tenant.series.is_empty());
        }
        result
    }

    fn seed_tenant(
        &self,
        tenant: &TenantSeries,
        record: &PersistedMetric,
        name: String,
        labels: MetricLabels,
        now_ms: u64,
    ) -> Result<(), EngineError> {
        let key = resolve_key(&record.tenant_id, &name, &labels);
        let type_entry = tenant.types.entry(name.clone());
        if let Entry::Occupied(pinned) = &type_entry {
            if *pinned.get() != record.metric_type {
                return Err(type_conflict(&name, *pinned.get(), record.metric_type));
            }
        }

        match tenant.series.entry(key) {
            Entry::Occupied(mut occupied) => {
                let series = occupied.get_mut();
                series.seed(record.value)?;
                series.last_updated_ms = now_ms;
            }
            Entry::Vacant(vacant) => {
                let shape = SeriesShape {
                    metric_type: record.metric_type,
                    buckets: None,
                    quantiles: None,
                };
                let mut series = Series::new(name, labels, shape, &self.settings, now_ms);
                series.seed(record.value)?;
                vacant.insert(series);
            }
        }

        if let Entry::Vacant(vacant) = type_entry {
            vacant.insert(record.metric_type);
        }
        Ok(())
    }

    /// Removes series idle for strictly longer than `ttl`, then the fixed
    /// types of names without series and the tenants left empty.
    pub fn evict_expired(&self, ttl: Duration) -> usize {
        let now_ms = self.clock.now_ms();
        let ttl_ms = ttl.as_millis() as u64;
        let expired = |series: &Series| now_ms.saturating_sub(series.last_updated_ms) > ttl_ms;

        let mut evicted = 0;
        for tenant_id in self.tenant_ids() {
            if let Some(tenant) = self.tenants.get(&tenant_id) {
                let candidates: Vec<SeriesKey> = tenant
                    .series
                    .iter()
                    .filter(|entry| expired(entry.value()))
                    .map(|entry| entry.key().clone())
                    .collect();
                for key in candidates {
                    // A write may have refreshed the series since the scan.
                    if tenant
                        .series
                        .remove_if(&key, |_, series| expired(series))
                        .is_some()
                    {
                        evicted += 1;
                    }
                }
            }

            if let Some(mut tenant) = self.tenants.get_mut(&tenant_id) {
                let TenantSeries { series, types } = &mut *tenant;
                let live: HashSet<String> = series
                    .iter()
                    .map(|entry| entry.value().name.clone())
                    .collect();
                types.retain(|name, _| live.contains(name));
            }

            self.tenants
                .remove_if(&tenant_id, |_, tenant| tenant.series.is_empty());
        }
        evicted
    }

    /// Drops every series of a tenant. Returns how many were removed.
    pub fn remove_tenant(&self, tenant_id: &str) -> usize {
        self.tenants
            .remove(tenant_id)
            .map(|(_, tenant)| tenant.series.len())
            .unwrap_or(0)
    }

    pub fn series_count(&self) -> usize {
        self.tenants
            .iter()
            .map(|tenant| tenant.value().series.len())
            .sum()
    }

    pub fn tenant_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tenants
            .iter()
            .map(|tenant| tenant.key().clone())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn stats(&self, tenant_id: &str) -> TenantStats {
        let mut by_type: BTreeMap<String, usize> = MetricType::ALL
            .iter()
            .map(|metric_type| (metric_type.to_string(), 0))
            .collect();
        let mut total_series = 0;

        if let Some(tenant) = self.tenants.get(tenant_id) {
            for entry in tenant.series.iter() {
                total_series += 1;
                *by_type
                    .entry(entry.value().metric_type().to_string())
                    .or_default() += 1;
            }
        }

        TenantStats {
            total_series,
            by_type,
        }
    }

    /// Copies the series of one tenant, or of every tenant.
    pub fn snapshot(&self, tenant_id: Option<&str>) -> Vec<SeriesSnapshot> {
        let tenant_ids = match tenant_id {
            Some(tenant_id) => vec![tenant_id.to_string()],
            None => self.tenant_ids(),
        };

        let mut snapshots = Vec::new();
        for tenant_id in tenant_ids {
            let Some(tenant) = self.tenants.get(&tenant_id) else {
                continue;
            };
            for entry in tenant.series.iter() {
                let series = entry.value();
                let help = self
                    .resolver
                    .definition(&tenant_id, &series.name)
                    .and_then(|definition| definition.description.clone());
                snapshots.push(SeriesSnapshot {
                    tenant_id: tenant_id.clone(),
                    name: series.name.clone(),
                    metric_type: series.metric_type(),
                    labels: series.labels.clone(),
                    help,
                    sample: SampleSnapshot::from(&series.state),
                });
            }
        }
        snapshots
    }
}

fn type_conflict(name: &str, existing: MetricType, persisted: MetricType) -> EngineError {
    EngineError::restore_row(format!(
        "{} is a {}, the persisted row is a {}",
        name, existing, persisted
    ))
}

fn check_reserved_labels(metric_type: MetricType, labels: &MetricLabels) -> Result<(), EngineError> {
    let reserved = match metric_type {
        MetricType::Histogram => "le",
        MetricType::Summary => "quantile",
        MetricType::Counter | MetricType::Gauge => return Ok(()),
    };
    if labels.get_label(reserved).is_some() {
        return Err(EngineError::Validation(format!(
            "label '{}' is reserved for {} series",
            reserved, metric_type
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{GaugeOperation, MetricDefinition};
    use crate::engine::{ManualClock, MetricConfigRegistry, NoMetricConfig};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingSink {
        records: Mutex<Vec<PersistedMetric>>,
    }

    impl PersistenceSink for RecordingSink {
        fn enqueue(&self, record: PersistedMetric) {
            self.records.lock().unwrap().push(record);
        }
    }

    fn store() -> (AggregationStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = AggregationStore::new(
            EngineSettings::default(),
            clock.clone(),
            Arc::new(NoMetricConfig),
            None,
        );
        (store, clock)
    }

    fn value_of(store: &AggregationStore, tenant: &str, name: &str) -> Option<f64> {
        store
            .snapshot(Some(tenant))
            .into_iter()
            .find(|s| s.name == name)
            .and_then(|s| match s.sample {
                SampleSnapshot::Value(v) => Some(v),
                _ => None,
            })
    }

    #[test]
    fn test_counter_sums_deltas() {
        let (store, _) = store();
        for _ in 0..3 {
            let observation = Observation::new("requests_total", MetricType::Counter, 1.0)
                .with_label("method", "GET");
            store.apply("acme", &observation).unwrap();
        }
        assert_eq!(value_of(&store, "acme", "requests_total"), Some(3.0));
        assert_eq!(store.series_count(), 1);
    }

    #[test]
    fn test_rejected_observation_creates_nothing() {
        let (store, _) = store();
        let negative = Observation::new("jobs_total", MetricType::Counter, -1.0);
        assert_eq!(
            store.apply("acme", &negative),
            Err(EngineError::InvalidCounterDelta(-1.0))
        );
        let nan = Observation::new("x", MetricType::Gauge, f64::NAN);
        assert!(matches!(
            store.apply("acme", &nan),
            Err(EngineError::Validation(_))
        ));
        let blank = Observation::new("  ", MetricType::Gauge, 1.0);
        assert!(store.apply("acme", &blank).is_err());
        assert_eq!(store.series_count(), 0);
        assert_eq!(store.stats("acme").total_series, 0);
        assert!(store.tenant_ids().is_empty());

        // The rejected counter did not fix the type of the name
        let gauge = Observation::new("jobs_total", MetricType::Gauge, 3.0);
        assert_eq!(
            store.apply("acme", &gauge).unwrap().metric_type,
            MetricType::Gauge
        );
    }

    #[test]
    fn test_rejected_seed_leaves_no_tenant() {
        let (store, _) = store();
        let record = PersistedMetric {
            tenant_id: "acme".to_string(),
            metric_name: "jobs_total".to_string(),
            metric_type: MetricType::Counter,
            value: -4.0,
            labels: MetricLabels::new(),
        };
        assert!(matches!(store.seed(&record), Err(EngineError::RestoreRow(_))));
        assert!(store.tenant_ids().is_empty());
    }

    #[test]
    fn test_gauge_clamps_at_zero() {
        let (store, _) = store();
        let ops = [
            (5.0, GaugeOperation::Set),
            (2.0, GaugeOperation::Increment),
            (10.0, GaugeOperation::Decrement),
        ];
        for (value, operation) in ops {
            let observation =
                Observation::new("queue_depth", MetricType::Gauge, value).with_operation(operation);
            store.apply("acme", &observation).unwrap();
        }
        assert_eq!(value_of(&store, "acme", "queue_depth"), Some(0.0));
    }

    #[test]
    fn test_first_type_wins() {
        let (store, _) = store();
        store
            .apply("acme", &Observation::new("m", MetricType::Gauge, 3.0))
            .unwrap();
        let result = store
            .apply(
                "acme",
                &Observation::new("m", MetricType::Counter, 1.0).with_label("a", "b"),
            )
            .unwrap();
        assert!(result.coerced);
        assert_eq!(result.metric_type, MetricType::Gauge);
        // Another tenant is not affected.
        let other = store
            .apply("globex", &Observation::new("m", MetricType::Counter, 1.0))
            .unwrap();
        assert_eq!(other.metric_type, MetricType::Counter);
        assert!(!other.coerced);
    }

    #[test]
    fn test_configured_type_and_buckets() {
        let registry = MetricConfigRegistry::from_definitions(
            [MetricDefinition::new("*", "latency", MetricType::Histogram)
                .with_buckets(vec![0.1, 1.0])
                .with_description("Request latency")],
            200,
        )
        .unwrap();
        let store = AggregationStore::new(
            EngineSettings::default(),
            Arc::new(ManualClock::new(0)),
            Arc::new(registry),
            None,
        );
        let result = store
            .apply("acme", &Observation::new("latency", MetricType::Gauge, 0.5))
            .unwrap();
        assert!(result.coerced);
        assert_eq!(result.metric_type, MetricType::Histogram);

        let snapshot = store.snapshot(Some("acme"));
        assert_eq!(snapshot[0].help.as_deref(), Some("Request latency"));
        assert_eq!(
            snapshot[0].sample,
            SampleSnapshot::Histogram {
                buckets: vec![(0.1, 0), (1.0, 1)],
                sum: 0.5,
                count: 1,
            }
        );
    }

    #[test]
    fn test_reserved_labels() {
        let (store, _) = store();
        let histogram = Observation::new("h", MetricType::Histogram, 1.0).with_label("le", "1");
        assert!(matches!(
            store.apply("acme", &histogram),
            Err(EngineError::Validation(_))
        ));
        let summary =
            Observation::new("s", MetricType::Summary, 1.0).with_label("quantile", "0.5");
        assert!(store.apply("acme", &summary).is_err());
        let gauge = Observation::new("g", MetricType::Gauge, 1.0).with_label("le", "1");
        assert!(store.apply("acme", &gauge).is_ok());
    }

    #[test]
    fn test_label_order_and_sanitization_share_a_series() {
        let (store, _) = store();
        let a = Observation::new("1bad name!", MetricType::Counter, 1.0)
            .with_label("b", "2")
            .with_label("a", "1");
        let b = Observation::new("1bad name!", MetricType::Counter, 1.0)
            .with_label("a", "1")
            .with_label("b", "2");
        let first = store.apply("acme", &a).unwrap();
        let second = store.apply("acme", &b).unwrap();
        assert_eq!(first.key, second.key);
        assert_eq!(value_of(&store, "acme", "metric_1bad_name_"), Some(2.0));
    }

    #[test]
    fn test_enqueues_counters_and_gauges_only() {
        let sink = Arc::new(RecordingSink::default());
        let store = AggregationStore::new(
            EngineSettings::default(),
            Arc::new(ManualClock::new(0)),
            Arc::new(NoMetricConfig),
            Some(sink.clone()),
        );
        store
            .apply("acme", &Observation::new("c", MetricType::Counter, 2.0))
            .unwrap();
        store
            .apply("acme", &Observation::new("c", MetricType::Counter, 3.0))
            .unwrap();
        store
            .apply("acme", &Observation::new("h", MetricType::Histogram, 3.0))
            .unwrap();
        store
            .apply("acme", &Observation::new("c", MetricType::Counter, -3.0))
            .unwrap_err();

        let records = sink.records.lock().unwrap();
        let values: Vec<f64> = records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2.0, 5.0]);
        assert!(records.iter().all(|r| r.metric_type == MetricType::Counter));
    }

    #[test]
    fn test_observe_batch_partial_failure() {
        let (store, _) = store();
        let outcome = store.observe_batch(
            "acme",
            &[
                Observation::new("a", MetricType::Counter, 1.0),
                Observation::new("a", MetricType::Counter, -1.0),
                Observation::new("b", MetricType::Gauge, 4.0),
            ],
        );
        assert_eq!(outcome.accepted, 2);
        assert_eq!(outcome.rejected, 1);
        assert!(!outcome.results[1].accepted);
        assert!(outcome.results[1].reason.is_some());
        assert_eq!(value_of(&store, "acme", "a"), Some(1.0));
    }

    #[test]
    fn test_seed_is_idempotent() {
        let sink = Arc::new(RecordingSink::default());
        let store = AggregationStore::new(
            EngineSettings::default(),
            Arc::new(ManualClock::new(0)),
            Arc::new(NoMetricConfig),
            Some(sink.clone()),
        );
        let record = PersistedMetric {
            tenant_id: "acme".to_string(),
            metric_name: "jobs_total".to_string(),
            metric_type: MetricType::Counter,
            value: 42.0,
            labels: MetricLabels::new(),
        };
        store.seed(&record).unwrap();
        store.seed(&record).unwrap();
        assert_eq!(value_of(&store, "acme", "jobs_total"), Some(42.0));
        assert!(sink.records.lock().unwrap().is_empty());

        store
            .apply(
                "acme",
                &Observation::new("jobs_total", MetricType::Counter, 1.0),
            )
            .unwrap();
        assert_eq!(value_of(&store, "acme", "jobs_total"), Some(43.0));

        let conflicting = PersistedMetric {
            metric_type: MetricType::Gauge,
            ..record.clone()
        };
        assert!(matches!(
            store.seed(&conflicting),
            Err(EngineError::RestoreRow(_))
        ));
        let histogram = PersistedMetric {
            metric_type: MetricType::Histogram,
            ..record
        };
        assert!(store.seed(&histogram).is_err());
    }

    #[test]
    fn test_evict_expired() {
        let (store, clock) = store();
        store
            .apply("acme", &Observation::new("old", MetricType::Gauge, 1.0))
            .unwrap();
        store
            .apply("globex", &Observation::new("old", MetricType::Gauge, 1.0))
            .unwrap();
        clock.advance(Duration::from_secs(30));
        store
            .apply("acme", &Observation::new("fresh", MetricType::Gauge, 1.0))
            .unwrap();

        // Exactly at the TTL nothing goes.
        assert_eq!(store.evict_expired(Duration::from_secs(30)), 0);
        clock.advance(Duration::from_millis(1));
        assert_eq!(store.evict_expired(Duration::from_secs(30)), 2);

        assert_eq!(store.tenant_ids(), vec!["acme".to_string()]);
        assert_eq!(store.series_count(), 1);

        // The forgotten type of "old" can be chosen again.
        let result = store
            .apply("acme", &Observation::new("old", MetricType::Counter, 5.0))
            .unwrap();
        assert_eq!(result.metric_type, MetricType::Counter);
        assert_eq!(result.value, Some(5.0));
    }

    #[test]
    fn test_stats_and_remove_tenant() {
        let (store, _) = store();
        store
            .apply("acme", &Observation::new("a", MetricType::Counter, 1.0))
            .unwrap();
        store
            .apply("acme", &Observation::new("b", MetricType::Summary, 1.0))
            .unwrap();
        let stats = store.stats("acme");
        assert_eq!(stats.total_series, 2);
        assert_eq!(stats.by_type["counter"], 1);
        assert_eq!(stats.by_type["summary"], 1);
        assert_eq!(stats.by_type["gauge"], 0);
        assert_eq!(store.stats("nobody").total_series, 0);

        assert_eq!(store.remove_tenant("acme"), 2);
        assert_eq!(store.remove_tenant("acme"), 0);
        assert!(store.snapshot(None).is_empty());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let (store, _) = store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        store
                            .apply("acme", &Observation::new("hits", MetricType::Counter, 1.0))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(value_of(&store, "acme", "hits"), Some(8_000.0));
    }

    #[test]
    fn test_concurrent_first_writes_agree_on_the_type() {
        for _ in 0..50 {
            let (store, _) = store();
            let store = Arc::new(store);
            let handles: Vec<_> = (0..8)
                .map(|thread| {
                    let store = store.clone();
                    std::thread::spawn(move || {
                        let declared = if thread % 2 == 0 {
                            MetricType::Counter
                        } else {
                            MetricType::Gauge
                        };
                        for i in 0..20 {
                            let observation = Observation::new("m", declared, 1.0)
                                .with_label("series", format!("{}-{}", thread, i));
                            store.apply("acme", &observation).unwrap();
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            let types: HashSet<MetricType> = store
                .snapshot(Some("acme"))
                .into_iter()
                .map(|snapshot| snapshot.metric_type)
                .collect();
            assert_eq!(types.len(), 1, "name has several types: {:?}", types);
            assert_eq!(store.series_count(), 160);
        }
    }
}
