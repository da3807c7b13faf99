use super::app_error::AppError;
use super::health::{__path_liveness, __path_readiness, liveness, readiness};
use super::metrics::{
    __path_delete_tenant, __path_observe, __path_observe_batch, __path_registry_exposition,
    __path_tenant_exposition, __path_tenant_stats, delete_tenant, observe, observe_batch,
    registry_exposition, tenant_exposition, tenant_stats,
};
use super::state::HttpServerState;
use crate::config;
use anyhow::Result;
use axum::Json;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::header;
use axum::routing::{delete, get, post};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace;
use tower_http::{ServiceBuilderExt, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{Level, error, info};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable as ScalarServable};

#[derive(OpenApi)]
#[openapi(
    tags(
        (name = "PromHub", description = "PromHub API"),
        (name = "Metrics", description = "Observation ingestion and Prometheus exposition"),
        (name = "Health", description = "Liveness and readiness probes"),
    ),
    paths(frontpage, observe, observe_batch, tenant_exposition, registry_exposition,
        tenant_stats, delete_tenant, liveness, readiness),
)]
struct ApiDoc;

/// Routes and middleware, without a listener.
pub fn create_router(state: HttpServerState, body_limit: usize, timeout: Duration) -> Router {
    let max_body_layer = DefaultBodyLimit::max(body_limit);

    // List of headers that shouldn't be logged
    let sensitive_headers: Arc<[_]> = vec![header::AUTHORIZATION, header::COOKIE].into();

    // Middleware creation
    let middleware = ServiceBuilder::new()
        .sensitive_request_headers(sensitive_headers.clone())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .sensitive_response_headers(sensitive_headers)
        .layer(TimeoutLayer::new(timeout))
        .compression()
        .into_inner();

    Router::new()
        .route("/", get(frontpage))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        // Ingestion
        .route(
            "/api/v1/tenants/{tenant_id}/observations",
            post(observe).layer(max_body_layer.clone()),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/observations/batch",
            post(observe_batch).layer(max_body_layer),
        )
        // Exposition
        .route("/api/v1/tenants/{tenant_id}/metrics", get(tenant_exposition))
        .route("/metrics", get(registry_exposition))
        // Administration
        .route("/api/v1/tenants/{tenant_id}/stats", get(tenant_stats))
        .route("/api/v1/tenants/{tenant_id}", delete(delete_tenant))
        // Health checks
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .layer(middleware)
        .with_state(state)
}

pub async fn run_http_server(
    state: HttpServerState,
    address: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let config = config::get()?;
    let app = create_router(
        state,
        config.parse_http_body_limit()?,
        Duration::from_secs(config.http_server_timeout_seconds),
    );

    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("HTTP server listening on {}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Resolves on CTRL+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[utoipa::path(
    get,
    path = "/",
    tag = "PromHub",
    responses(
        (status = 200, description = "PromHub Frontpage", body = String)
    )
)]
async fn frontpage(State(state): State<HttpServerState>) -> Result<Json<String>, AppError> {
    let name: String = (*state.name).clone();
    Ok(Json(name))
}
