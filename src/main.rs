#![forbid(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use promhub::config::{self, load_configuration_from};
use promhub::datamodel::MetricDefinition;
use promhub::engine::{
    AggregationStore, EvictionSweeper, MetricConfigRegistry, SystemClock, join_tasks,
};
use promhub::http::server::{run_http_server, shutdown_signal};
use promhub::http::state::HttpServerState;
use promhub::persistence::{PersistenceBatcher, PersistenceSink, restore_from_storage};
use promhub::storage::storage_factory::create_storage_from_connection_string;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, event, info};

/// Multi-tenant Prometheus metric aggregation server
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Settings file, read after the PROMHUB_* environment variables
    #[arg(long, default_value = "settings.toml")]
    settings: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    // Initialize tracing subscriber for HTTP request logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    // Load configuration
    load_configuration_from(&args.settings).context("Failed to load configuration")?;
    let config = config::get().context("Failed to get configuration")?;
    let settings = config
        .engine_settings()
        .context("Invalid engine settings")?;

    // Initialize Sentry if DSN is provided
    let _sentry = config.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.clone(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    // Initialize storage backend
    info!("Connecting to storage");
    let storage = create_storage_from_connection_string(&config.storage_connection_string)
        .await
        .context("Failed to create storage backend")?;

    // Initialize database schema
    storage
        .create_or_migrate()
        .await
        .context("Failed to create or migrate database schema")?;
    info!("Storage backend initialized successfully");

    let definitions: Vec<MetricDefinition> = config
        .metrics
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(MetricDefinition::from)
        .collect();
    let registry = MetricConfigRegistry::from_definitions(definitions, settings.max_metric_name_length)
        .context("Invalid metric definitions")?;
    info!(definitions = registry.len(), "Metric configuration loaded");

    let batcher = Arc::new(PersistenceBatcher::from_settings(storage.clone(), &settings));
    let sink: Arc<dyn PersistenceSink> = batcher.clone();
    let store = Arc::new(AggregationStore::new(
        settings.clone(),
        Arc::new(SystemClock),
        Arc::new(registry),
        Some(sink),
    ));

    // Restore before accepting traffic
    let report = restore_from_storage(storage.as_ref(), &store)
        .await
        .context("Failed to restore persisted metric values")?;
    info!(
        restored = report.restored,
        skipped = report.skipped,
        "Persisted state restored"
    );

    // Exit the program if a panic occurs
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let token = CancellationToken::new();
    let sweeper = EvictionSweeper::new(store.clone(), settings.metric_ttl)
        .spawn(settings.cleanup_interval, token.clone());
    let flusher = batcher
        .clone()
        .spawn(settings.flush_interval, token.clone());

    let address = SocketAddr::from((config.endpoint, config.port));
    let result = run_http_server(
        HttpServerState {
            name: Arc::new("PromHub".to_string()),
            store,
            batcher: Some(batcher),
            storage,
        },
        address,
        shutdown_signal(),
    )
    .await;

    // Stop the background tasks, the batcher flushes one last time
    token.cancel();
    join_tasks(vec![("eviction", sweeper), ("persistence", flusher)]).await;

    match result {
        Ok(_) => {
            event!(Level::INFO, "HTTP server stopped gracefully");
            Ok(())
        }
        Err(err) => {
            event!(Level::ERROR, "HTTP server failed to start: {}", err);
            Err(err)
        }
    }
}
