// crates/server/src/routes/jobs.rs
//! API routes for jobs.
//!
//! - POST   /jobs               Create and start a job over `items`
//! - GET    /jobs               Recent jobs, most recent first
//! - GET    /jobs/stream        SSE stream of job progress updates
//! - GET    /jobs/{id}          Status and counters (`?results=true` adds results)
//! - POST   /jobs/{id}/cancel   Request cancellation
//! - DELETE /jobs/{id}          Remove a job and its results

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use jobkeeper_core::{ItemResult, JobId, JobStatus, JobSummary};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use ts_rs::TS;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// What a failed job reports over HTTP in place of its stored error text.
pub const SANITIZED_JOB_ERROR: &str = "internal error";

const DEFAULT_LIST_LIMIT: u32 = 50;

#[derive(Debug, Deserialize, TS)]
#[ts(export, export_to = "../../../web/src/types/generated/")]
pub struct CreateJobRequest {
    pub items: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../../../web/src/types/generated/")]
#[cfg_attr(test, derive(Deserialize))]
pub struct CreateJobResponse {
    #[ts(type = "string")]
    pub job_id: JobId,
    #[ts(type = "number")]
    pub total_items: u64,
}

/// Job status as seen by clients.
#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../../../web/src/types/generated/")]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobStatusResponse {
    #[ts(type = "string")]
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: JobStatus,
    #[ts(type = "number")]
    pub processed: u64,
    #[ts(type = "number")]
    pub total: u64,
    #[ts(type = "number")]
    pub success: u64,
    #[ts(type = "number")]
    pub errors: u64,
    pub percentage: f64,
    /// Categorized message only; the stored error text stays server-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ItemResult>>,
    #[ts(type = "number")]
    pub created_at: i64,
    #[ts(type = "number | null")]
    pub started_at: Option<i64>,
    #[ts(type = "number | null")]
    pub completed_at: Option<i64>,
}

impl JobStatusResponse {
    fn from_summary(summary: &JobSummary, results: Option<Vec<ItemResult>>) -> Self {
        let error = match summary.status {
            JobStatus::Failed => Some(SANITIZED_JOB_ERROR.to_string()),
            _ => None,
        };
        Self {
            job_id: summary.job_id,
            title: summary.title.clone(),
            status: summary.status,
            processed: summary.processed_items,
            total: summary.total_items,
            success: summary.success_count,
            errors: summary.error_count,
            percentage: summary.percentage(),
            error,
            results,
            created_at: summary.created_at,
            started_at: summary.started_at,
            completed_at: summary.completed_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub results: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../../../web/src/types/generated/")]
#[cfg_attr(test, derive(Deserialize))]
pub struct CancelJobResponse {
    #[ts(type = "string")]
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct DeleteJobResponse {
    pub job_id: JobId,
    pub deleted: bool,
}

/// POST /api/jobs - Create a job, set the active-job pointer and start it.
async fn create_job(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateJobRequest>, JsonRejection>,
) -> ApiResult<Json<CreateJobResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if let Some(index) = request.items.iter().position(|item| item.trim().is_empty()) {
        return Err(ApiError::BadRequest(format!("item {index} is blank")));
    }

    let total_items = request.items.len() as u64;
    let job_id = state
        .jobs
        .submit(request.items, request.title.as_deref(), Arc::clone(&state.work))
        .await?;

    Ok(Json(CreateJobResponse {
        job_id,
        total_items,
    }))
}

/// GET /api/jobs - Recent jobs, most recent first.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<JobStatusResponse>>> {
    let jobs = state
        .jobs
        .list_jobs(query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(Json(
        jobs.iter()
            .map(|summary| JobStatusResponse::from_summary(summary, None))
            .collect(),
    ))
}

/// GET /api/jobs/{id} - Status and counters, plus results on request.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<JobStatusResponse>> {
    if query.results {
        let job = state.jobs.get_job(&job_id).await?;
        let summary = JobSummary::from(&job);
        return Ok(Json(JobStatusResponse::from_summary(&summary, Some(job.results))));
    }
    let summary = state.jobs.get_job_status(&job_id).await?;
    Ok(Json(JobStatusResponse::from_summary(&summary, None)))
}

/// POST /api/jobs/{id}/cancel - Request cooperative cancellation.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelJobResponse>> {
    let id = JobId::parse(&job_id)?;
    let status = state.jobs.cancel_job(&job_id).await?;
    Ok(Json(CancelJobResponse { job_id: id, status }))
}

/// DELETE /api/jobs/{id} - Remove a job and its results.
async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<DeleteJobResponse>> {
    let id = JobId::parse(&job_id)?;
    state.jobs.delete_job(&job_id).await?;
    Ok(Json(DeleteJobResponse {
        job_id: id,
        deleted: true,
    }))
}

/// GET /api/jobs/stream - SSE stream of all job progress updates.
///
/// Best-effort: a lagging subscriber skips missed updates and keeps going.
async fn stream_jobs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.jobs.subscribe();

    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(progress) => {
                    let json = serde_json::to_string(&progress).unwrap_or_default();
                    yield Ok(Event::default().data(json));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "SSE subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/stream", get(stream_jobs))
        .route("/jobs/{id}", get(get_job).delete(delete_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
}
