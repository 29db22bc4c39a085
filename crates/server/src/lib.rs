//! Jobkeeper server library.
//!
//! Axum HTTP server for durable batch jobs: creates jobs, runs their items on
//! a bounded worker pool, persists every result to the shared SQLite store,
//! and serves status, cancellation and the active-job pointer.

pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use config::Config;
pub use error::*;
pub use jobs::{JobError, JobManager, JobProgress};
pub use metrics::init_metrics;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use jobkeeper_db::Database;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with default state over `db`.
pub fn create_app(db: Database) -> Router {
    create_app_with_state(AppState::new(db))
}

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs, active job) and `/metrics`
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app_with_state(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================
