use anyhow::{Context, Result};
use serde::Serialize;
use std::str::FromStr;
use tracing::{info, warn};

use crate::datamodel::{MetricLabels, MetricLabelsExt, MetricType, MetricValueRow, PersistedMetric};
use crate::engine::{AggregationStore, EngineError};
use crate::storage::StorageInstance;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub skipped: usize,
}

pub fn decode_row(row: MetricValueRow) -> Result<PersistedMetric, EngineError> {
    let metric_type = MetricType::from_str(&row.metric_type).map_err(EngineError::restore_row)?;
    if !metric_type.is_persisted() {
        return Err(EngineError::restore_row(format!(
            "{} rows cannot be restored",
            metric_type
        )));
    }
    let labels = MetricLabels::from_json(&row.labels)
        .map_err(|err| EngineError::restore_row(format!("malformed labels: {}", err)))?;

    Ok(PersistedMetric {
        tenant_id: row.tenant_id,
        metric_name: row.metric_name,
        metric_type,
        value: row.value,
        labels,
    })
}

/// Replays every persisted counter and gauge into the store. Bad rows are
/// skipped; only a failure to read the table is an error.
pub async fn restore_from_storage(
    storage: &dyn StorageInstance,
    store: &AggregationStore,
) -> Result<RestoreReport> {
    let rows = storage
        .load_metric_values()
        .await
        .context("Failed to read persisted metric values")?;

    let mut report = RestoreReport::default();
    for row in rows {
        let tenant_id = row.tenant_id.clone();
        let metric_name = row.metric_name.clone();
        match decode_row(row).and_then(|record| store.seed(&record)) {
            Ok(()) => report.restored += 1,
            Err(err) => {
                warn!(%tenant_id, %metric_name, "Skipping persisted row: {}", err);
                report.skipped += 1;
            }
        }
    }

    info!(
        restored = report.restored,
        skipped = report.skipped,
        "Restored persisted metric values"
    );
    Ok(report)
}
