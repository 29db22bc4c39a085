// crates/server/src/jobs/types.rs
//! Types for the job manager.

use jobkeeper_core::{InvalidJobId, JobId, JobStatus, JobSummary};
use jobkeeper_db::DbError;
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

/// Progress update pushed to SSE subscribers.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "../../../web/src/types/generated/")]
pub struct JobProgress {
    #[ts(type = "string")]
    pub job_id: JobId,
    pub status: JobStatus,
    #[ts(type = "number")]
    pub processed: u64,
    #[ts(type = "number")]
    pub total: u64,
    #[ts(type = "number")]
    pub success: u64,
    #[ts(type = "number")]
    pub errors: u64,
    pub timestamp: String,
}

impl From<&JobSummary> for JobProgress {
    fn from(summary: &JobSummary) -> Self {
        Self {
            job_id: summary.job_id,
            status: summary.status,
            processed: summary.processed_items,
            total: summary.total_items,
            success: summary.success_count,
            errors: summary.error_count,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Errors returned by [`JobManager`](super::JobManager) operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    InvalidId(#[from] InvalidJobId),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job has no items")]
    EmptyItems,

    #[error("Job {job_id} already exists")]
    AlreadyExists { job_id: JobId },

    #[error("Job {job_id} is {status}, expected queued")]
    NotQueued { job_id: JobId, status: JobStatus },

    #[error("Job {job_id} expects {expected} items, got {actual}")]
    ItemCountMismatch {
        job_id: JobId,
        expected: u64,
        actual: u64,
    },

    #[error("Worker pool closed")]
    PoolClosed(#[from] tokio::sync::AcquireError),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

pub type JobResult<T> = Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_progress_serialize() {
        let progress = JobProgress {
            job_id: JobId::parse("6f1c2d3e-4a5b-4c7d-8e9f-a0b1c2d3e4f5").unwrap(),
            status: JobStatus::Processing,
            processed: 2,
            total: 5,
            success: 1,
            errors: 1,
            timestamp: "2026-02-05T12:00:00Z".to_string(),
        };
        let json = serde_json::to_string(&progress).unwrap();
        assert!(json.contains("\"job_id\":\"6f1c2d3e-4a5b-4c7d-8e9f-a0b1c2d3e4f5\""));
        assert!(json.contains("\"status\":\"processing\""));
        assert!(json.contains("\"processed\":2"));
        assert!(json.contains("\"errors\":1"));
    }

    #[test]
    fn test_error_messages_name_the_job() {
        let id = JobId::new();
        let err = JobError::NotQueued {
            job_id: id,
            status: JobStatus::Completed,
        };
        let msg = err.to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("completed"));
    }
}
