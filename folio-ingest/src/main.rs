//! folio-ingest - Manuscript ingest and analysis orchestration service
//!
//! Segments manuscripts into narrative units, dispatches them to the external
//! analysis workers, tracks their lifecycle from worker callbacks and triggers
//! the project-wide merge once every unit is analyzed.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use folio_common::config::{
    default_config_path, ensure_root_folder, load_toml_config, resolve_root_folder,
};
use folio_ingest::config::OrchestratorConfig;
use folio_ingest::db::{
    init_database_pool, MemoryProjectStore, MemoryUnitStore, SqliteProjectStore, SqliteUnitStore,
};
use folio_ingest::services::HttpWorkQueue;
use folio_ingest::types::{ProjectStore, UnitStore};
use folio_ingest::AppState;

const DEFAULT_PORT: u16 = 5730;

/// Command-line arguments for folio-ingest
#[derive(Parser, Debug)]
#[command(name = "folio-ingest")]
#[command(about = "Manuscript ingest and analysis orchestration service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "FOLIO_PORT")]
    port: Option<u16>,

    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, env = "FOLIO_CONFIG")]
    config: Option<PathBuf>,

    /// Keep all state in memory (nothing survives a restart)
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path)?,
        None => Default::default(),
    };

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("folio_ingest={0},folio_common={0},tower_http=info", toml_config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting folio-ingest");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = OrchestratorConfig::resolve(&toml_config.orchestrator);
    info!(
        max_retry_count = config.max_retry_count,
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        callback_address = %config.callback_address,
        worker_queue_url = %config.worker_queue_url,
        "Orchestrator configuration resolved"
    );

    let (units, projects): (Arc<dyn UnitStore>, Arc<dyn ProjectStore>) = if args.in_memory {
        info!("Using in-memory stores");
        (Arc::new(MemoryUnitStore::new()), Arc::new(MemoryProjectStore::new()))
    } else {
        let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
        let db_path = ensure_root_folder(&root_folder)?;
        info!("Database: {}", db_path.display());

        let pool = init_database_pool(&db_path)
            .await
            .context("Failed to open database")?;
        (
            Arc::new(SqliteUnitStore::new(pool.clone())),
            Arc::new(SqliteProjectStore::new(pool)),
        )
    };

    let queue = Arc::new(
        HttpWorkQueue::new(config.worker_queue_url.clone()).context("Failed to build work queue client")?,
    );

    let state = AppState::new(units, projects, queue, config);

    let cancel = CancellationToken::new();
    let reconciler = Arc::clone(&state.reconciler).spawn(state.config.reconcile_interval, cancel.clone());
    let heartbeat = Arc::clone(&state.notifier).spawn_heartbeat(state.config.heartbeat_interval, cancel.clone());

    let notifier = Arc::clone(&state.notifier);
    let app = folio_ingest::build_router(state);

    let port = args.port.or(toml_config.port).unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);
    info!("Health check: http://127.0.0.1:{}/health", port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone(), notifier))
        .await
        .context("Server error")?;

    let _ = tokio::join!(reconciler, heartbeat);
    info!("Server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then stop background tasks and close
/// progress channels so SSE streams end and the server can drain
async fn shutdown_signal(cancel: CancellationToken, notifier: Arc<folio_ingest::services::ProgressNotifier>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    cancel.cancel();
    notifier.shutdown().await;
}
