//! Gridiron - data freshness and resilience core for the sports dashboard

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, LoggingConfig};
use gridiron_api::{AppState, create_router};
use gridiron_core::{
    CacheLayer, LiveSignal, QueryService, SyncOrchestrator, SyncScheduler, build_sources,
    spawn_cleanup_task,
};
use gridiron_db::Database;
use gridiron_storage::LocalKeyStore;

/// Gridiron - keeps dashboard data fresh and serves it from cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "GRIDIRON_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "GRIDIRON_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;
    config.apply_overrides(args.bind, args.port);

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Gridiron v{}", env!("CARGO_PKG_VERSION"));

    // Install the metrics recorder
    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(Arc::new(handle)),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            None
        }
    };

    // Initialize database
    if let Some(parent) = std::path::Path::new(&config.database.path).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let db = Database::connect(config.database_options()).await?;

    // Initialize cache layer
    let mut cache = CacheLayer::new(config.cache_config());
    if let Some(path) = config.cache.spill_path.as_deref().filter(|p| !p.is_empty()) {
        let store = LocalKeyStore::new(path).await?;
        cache = cache.with_durable(Arc::new(store));
        info!("Persistent cache entries stored under {}", path);
    }
    let cache = Arc::new(cache);

    // Initialize sync orchestrator
    let sources = build_sources(&config.sources)?;
    if sources.is_empty() {
        warn!("No upstream sources configured; serving stored data only");
    }
    for source in &sources {
        info!("Upstream source: {} ({})", source.name(), source.kind().as_str());
    }

    let live = Arc::new(LiveSignal::default());
    let sync = Arc::new(SyncOrchestrator::new(
        db.clone(),
        cache.clone(),
        live.clone(),
        sources,
        config.sync_config(),
    ));
    if let Err(e) = sync.seed_breaker_from_log().await {
        warn!("Could not restore source health from the sync log: {}", e);
    }

    // Initialize query service
    let query = Arc::new(QueryService::new(
        db.clone(),
        cache.clone(),
        live,
        config.query_config(),
    ));

    // Start background tasks
    let cleanup = spawn_cleanup_task(
        cache.clone(),
        Duration::from_secs(config.cache.cleanup_interval_secs),
    );
    let retention = spawn_retention_task(db.clone(), config.database.retention_days);
    let scheduler = SyncScheduler::start(
        sync.clone(),
        Duration::from_secs(config.sync.interval_secs),
        config.sync.run_on_startup,
    );

    // Create application state and router
    let state = AppState::new(db.clone(), cache, query, sync.clone());
    let app = create_router(state, metrics_handle);

    // Determine bind address
    let addr: SocketAddr =
        format!("{}:{}", config.server.bind_address, config.server.port).parse()?;

    info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Stop scheduling, then let any manual run finish before closing the store
    scheduler.stop().await;
    sync.wait_idle().await;
    cleanup.abort();
    retention.abort();
    db.close().await;

    served?;
    info!("Server stopped");
    Ok(())
}

/// Spawn a background task that deletes old sync log rows and retired injuries once a day
fn spawn_retention_task(db: Database, days: i64) -> tokio::task::JoinHandle<()> {
    info!("Starting retention task (keeping {} days)", days);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 3600));

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match db.cleanup_old_sync_log(days).await {
                Ok(0) => {}
                Ok(count) => info!("Deleted {} old sync log entries", count),
                Err(e) => error!("Sync log retention failed: {}", e),
            }
            match db.prune_inactive_injuries(days).await {
                Ok(0) => {}
                Ok(count) => info!("Deleted {} retired injuries", count),
                Err(e) => error!("Injury retention failed: {}", e),
            }
        }
    })
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format.as_str() {
        "json" => registry.with(fmt::layer().json()).init(),
        _ => registry.with(fmt::layer()).init(),
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
