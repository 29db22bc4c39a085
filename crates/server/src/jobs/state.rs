// crates/server/src/jobs/state.rs
//! In-process execution state for one running job.

use std::sync::atomic::{AtomicU64, Ordering};

use jobkeeper_core::{JobId, JobStatus};
use tokio_util::sync::CancellationToken;

use super::types::JobProgress;

/// Execution state for a job dispatched by this process.
///
/// Counters are lock-free atomics bumped by worker tasks after each persisted
/// append, so progress snapshots never wait on the store. The persisted row
/// stays authoritative; this is only what the push channel reports.
pub struct JobState {
    job_id: JobId,
    total: u64,
    processed: AtomicU64,
    success: AtomicU64,
    errors: AtomicU64,
    cancel: CancellationToken,
}

impl JobState {
    pub fn new(job_id: JobId, total: u64) -> Self {
        Self {
            job_id,
            total,
            processed: AtomicU64::new(0),
            success: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Token checked by the dispatch loop before each remaining item.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request cooperative cancellation. In-flight items still finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Count one persisted result. Returns the new processed count.
    pub fn record(&self, success: bool) -> u64 {
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Snapshot for the push channel.
    pub fn snapshot(&self, status: JobStatus) -> JobProgress {
        JobProgress {
            job_id: self.job_id,
            status,
            processed: self.processed.load(Ordering::Relaxed),
            total: self.total,
            success: self.success.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
