//! Cueflow Ingest - main entry point
//!
//! Receives NRCS/MOS-style rundown feed jobs over HTTP, reconciles them
//! into the playout document model and mirrors commit events over SSE.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cueflow_ingest::db::init::{init_schema, open_database};
use cueflow_ingest::db::DocStore;
use cueflow_ingest::ingest::{IngestContext, PassthroughBlueprint};
use cueflow_ingest::locks::LockManager;
use cueflow_ingest::{build_router, jobs, AppState};

/// Command-line arguments for cueflow-ingest
#[derive(Parser, Debug)]
#[command(name = "cueflow-ingest")]
#[command(about = "Rundown ingest and reconciliation service for Cueflow")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5780", env = "CUEFLOW_INGEST_PORT")]
    port: u16,

    /// Root folder holding the document store
    #[arg(short, long, env = "CUEFLOW_ROOT_FOLDER")]
    root_folder: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cueflow_ingest=debug,cueflow_common=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting Cueflow Ingest on port {}", args.port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let root_folder = cueflow_common::config::resolve_root_folder(
        args.root_folder.as_deref(),
        "CUEFLOW_ROOT_FOLDER",
    )
    .context("Failed to resolve root folder")?;
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;

    let db_path = cueflow_common::config::database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let pool = open_database(&db_path)
        .await
        .context("Failed to open database")?;
    init_schema(&pool)
        .await
        .context("Failed to initialize schema")?;
    let store = DocStore::new(pool);

    let (events, _) = broadcast::channel(100);

    let ctx = IngestContext {
        store: store.clone(),
        locks: Arc::new(LockManager::new()),
        blueprint: Arc::new(PassthroughBlueprint),
        events: events.clone(),
    };
    let queue = jobs::spawn_dispatcher(ctx);

    let state = AppState::new(store, events, queue);
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
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
}
