// crates/server/src/main.rs
//! Jobkeeper server binary.
//!
//! Opens the shared job store, fails orphans left by dead processes, starts
//! the retention sweeper, then serves the HTTP API on 127.0.0.1 until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use jobkeeper_core::StatFileWork;
use jobkeeper_db::Database;
use jobkeeper_server::sweeper::{reconcile_orphans, spawn_retention_sweeper};
use jobkeeper_server::{create_app_with_state, init_metrics, AppState, Config};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
    }
    tracing::info!("Shutting down");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);

    // Initialize Prometheus metrics
    init_metrics();

    // Step 1: Open the job store
    let db = match &config.db_path {
        Some(path) => Database::new(path).await?,
        None => Database::open_default().await?,
    };
    tracing::info!(path = %db.db_path().display(), "Job store opened");

    // Step 2: Fail jobs orphaned by a dead process
    reconcile_orphans(&db, config.orphan_stale_after()).await?;

    // Step 3: Periodic retention sweep
    let shutdown = CancellationToken::new();
    let sweeper = spawn_retention_sweeper(
        db.clone(),
        config.retention(),
        config.sweep_interval(),
        shutdown.clone(),
    );

    // Step 4: Build the app and serve
    let state = AppState::with_work(db, Arc::new(StatFileWork), config.worker_count());
    let app = create_app_with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        workers = config.worker_count(),
        version = env!("CARGO_PKG_VERSION"),
        "Jobkeeper listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Retention sweeper task ended abnormally");
    }

    Ok(())
}
