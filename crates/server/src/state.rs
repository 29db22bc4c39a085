// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use jobkeeper_core::{ItemWork, StatFileWork};
use jobkeeper_db::Database;

use crate::jobs::JobManager;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job store handle; shared with every other process on the host.
    pub db: Database,
    /// Job manager for this process (worker pool, dispatch loops, push channel).
    pub jobs: Arc<JobManager>,
    /// Work function applied to every item of jobs created over HTTP.
    pub work: Arc<dyn ItemWork>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    ///
    /// Uses [`StatFileWork`] and one worker per available core.
    pub fn new(db: Database) -> Arc<Self> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::with_work(db, Arc::new(StatFileWork), workers)
    }

    /// Create with a caller-provided work function and worker count.
    pub fn with_work(db: Database, work: Arc<dyn ItemWork>, workers: usize) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            jobs: Arc::new(JobManager::new(db.clone(), workers)),
            db,
            work,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_state_new() {
        let db = Database::new_in_memory().await.unwrap();
        let state = AppState::new(db);
        assert!(state.uptime_secs() < 2);
        assert!(state.jobs.worker_count() >= 1);
    }

    #[tokio::test]
    async fn test_zero_workers_is_clamped() {
        let db = Database::new_in_memory().await.unwrap();
        let state = AppState::with_work(db, Arc::new(StatFileWork), 0);
        assert_eq!(state.jobs.worker_count(), 1);
    }
}
