use super::app_error::AppError;
use super::state::HttpServerState;
use crate::datamodel::{
    GaugeOperation, MetricLabels, MetricType, Observation, label_value_from_json,
};
use crate::engine::{BatchOutcome, TenantStats};
use crate::exporters::prometheus::{CONTENT_TYPE, PrometheusTextConverter};
use anyhow::anyhow;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::{debug, info};
use utoipa::ToSchema;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ObserveRequest {
    pub metric_name: String,
    /// Declared type. Server-side metric configuration overrides it.
    #[serde(alias = "type")]
    pub metric_type: MetricType,
    pub value: f64,
    /// Label values may be any JSON scalar. `null` becomes `"null"`.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub labels: BTreeMap<String, JsonValue>,
    /// Gauges only. Inferred from the sign of `value` when absent.
    #[serde(default)]
    pub operation: Option<GaugeOperation>,
}

impl From<ObserveRequest> for Observation {
    fn from(request: ObserveRequest) -> Self {
        let labels: MetricLabels = request
            .labels
            .iter()
            .map(|(name, value)| (name.clone(), label_value_from_json(value)))
            .collect();
        Observation {
            metric_name: request.metric_name,
            metric_type: request.metric_type,
            value: request.value,
            labels,
            operation: request.operation,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ObserveResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteTenantResponse {
    pub tenant_id: String,
    pub series_removed: usize,
    pub pending_discarded: usize,
    pub rows_deleted: u64,
}

/// Record one observation.
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{tenant_id}/observations",
    tag = "Metrics",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    request_body = ObserveRequest,
    responses(
        (status = 200, description = "Observation applied", body = ObserveResponse),
        (status = 422, description = "Observation rejected, nothing was changed", body = ObserveResponse),
    )
)]
pub async fn observe(
    State(state): State<HttpServerState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<ObserveRequest>,
) -> impl IntoResponse {
    let observation = Observation::from(request);
    match state.store.apply(&tenant_id, &observation) {
        Ok(_) => (
            StatusCode::OK,
            Json(ObserveResponse {
                accepted: true,
                reason: None,
            }),
        ),
        Err(err) => {
            debug!(%tenant_id, metric = %observation.metric_name, "Observation rejected: {}", err);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ObserveResponse {
                    accepted: false,
                    reason: Some(err.to_string()),
                }),
            )
        }
    }
}

/// Record many observations.
///
/// Every observation is applied on its own; the response lists the
/// outcome of each one.
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{tenant_id}/observations/batch",
    tag = "Metrics",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    request_body = Vec<ObserveRequest>,
    responses(
        (status = 200, description = "Per observation outcome", body = BatchOutcome),
        (status = 400, description = "Empty batch", body = AppError),
    )
)]
pub async fn observe_batch(
    State(state): State<HttpServerState>,
    Path(tenant_id): Path<String>,
    Json(requests): Json<Vec<ObserveRequest>>,
) -> Result<Json<BatchOutcome>, AppError> {
    if requests.is_empty() {
        return Err(AppError::bad_request(anyhow!(
            "The batch contains no observations"
        )));
    }
    let observations: Vec<Observation> = requests.into_iter().map(Observation::from).collect();
    let outcome = state.store.observe_batch(&tenant_id, &observations);
    debug!(
        %tenant_id,
        accepted = outcome.accepted,
        rejected = outcome.rejected,
        "Batch applied"
    );
    Ok(Json(outcome))
}

/// Prometheus exposition of one tenant.
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{tenant_id}/metrics",
    tag = "Metrics",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    responses(
        (status = 200, description = "Prometheus text format 0.0.4", body = String, content_type = "text/plain")
    )
)]
pub async fn tenant_exposition(
    State(state): State<HttpServerState>,
    Path(tenant_id): Path<String>,
) -> impl IntoResponse {
    let body = PrometheusTextConverter::render(&state.store, Some(&tenant_id));
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body)
}

/// Prometheus exposition of every tenant, labelled with `tenant_id`.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Metrics",
    responses(
        (status = 200, description = "Prometheus text format 0.0.4", body = String, content_type = "text/plain")
    )
)]
pub async fn registry_exposition(State(state): State<HttpServerState>) -> impl IntoResponse {
    let body = PrometheusTextConverter::render(&state.store, None);
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body)
}

/// Series count of a tenant, per metric type.
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{tenant_id}/stats",
    tag = "Metrics",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    responses(
        (status = 200, description = "Tenant statistics", body = TenantStats)
    )
)]
pub async fn tenant_stats(
    State(state): State<HttpServerState>,
    Path(tenant_id): Path<String>,
) -> Json<TenantStats> {
    Json(state.store.stats(&tenant_id))
}

/// Delete a tenant.
///
/// Drops its series from memory, its unflushed values and its persisted rows.
#[utoipa::path(
    delete,
    path = "/api/v1/tenants/{tenant_id}",
    tag = "Metrics",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    responses(
        (status = 200, description = "Tenant deleted", body = DeleteTenantResponse),
        (status = 404, description = "Unknown tenant", body = AppError),
        (status = 500, description = "Internal Server Error", body = AppError),
    )
)]
pub async fn delete_tenant(
    State(state): State<HttpServerState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<DeleteTenantResponse>, AppError> {
    let series_removed = state.store.remove_tenant(&tenant_id);
    let (pending_discarded, rows_deleted) = match &state.batcher {
        Some(batcher) => batcher.delete_tenant(&tenant_id).await?,
        None => (0, state.storage.delete_tenant(&tenant_id).await?),
    };

    if series_removed == 0 && pending_discarded == 0 && rows_deleted == 0 {
        return Err(AppError::not_found(anyhow!(
            "Tenant {} not found",
            tenant_id
        )));
    }

    info!(
        %tenant_id,
        series_removed,
        pending_discarded,
        rows_deleted,
        "Tenant deleted"
    );
    Ok(Json(DeleteTenantResponse {
        tenant_id,
        series_removed,
        pending_discarded,
        rows_deleted,
    }))
}
