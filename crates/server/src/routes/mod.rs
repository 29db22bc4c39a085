//! API route handlers for the jobkeeper server.

pub mod active_job;
pub mod health;
pub mod jobs;
pub mod metrics;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET    /api/health            - Health check
/// - POST   /api/jobs              - Create and start a job
/// - GET    /api/jobs              - Recent jobs
/// - GET    /api/jobs/stream       - SSE stream of job progress
/// - GET    /api/jobs/{id}         - Job status (`?results=true` for results)
/// - POST   /api/jobs/{id}/cancel  - Cancel a job
/// - DELETE /api/jobs/{id}         - Delete a job
/// - GET    /api/active-job        - Active-job pointer
/// - POST   /api/active-job        - Set the pointer
/// - DELETE /api/active-job        - Clear the pointer (`?job_id=` to compare-and-clear)
/// - GET    /metrics               - Prometheus metrics (root, no prefix)
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .nest("/api", active_job::router())
        .merge(metrics::router())
        .with_state(state)
}
