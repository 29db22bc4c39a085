// crates/server/src/jobs/manager.rs
//! Job manager: owns this process's worker pool and per-job dispatch loops.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use jobkeeper_core::{ItemResult, ItemWork, Job, JobId, JobStatus, JobSummary};
use jobkeeper_db::Database;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::state::JobState;
use super::types::{JobError, JobProgress, JobResult};
use crate::metrics;

/// Upper bound for `list_jobs`.
pub const MAX_LIST_LIMIT: u32 = 200;

/// Runs jobs for this process.
///
/// One semaphore of `workers` permits is shared by every job in the process,
/// so N bounds concurrent item executions, not concurrent jobs. Each started
/// job gets its own dispatch loop task. The job store is the only durable
/// state; the in-memory map only tracks what this process is executing.
pub struct JobManager {
    db: Database,
    workers: Arc<Semaphore>,
    worker_count: usize,
    jobs: RwLock<HashMap<JobId, Arc<JobState>>>,
    progress_tx: broadcast::Sender<JobProgress>,
}

impl JobManager {
    pub fn new(db: Database, workers: usize) -> Self {
        let worker_count = workers.max(1);
        let (progress_tx, _) = broadcast::channel(256);
        Self {
            db,
            workers: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            jobs: RwLock::new(HashMap::new()),
            progress_tx,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Subscribe to progress updates for every job run or cancelled here (for SSE).
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgress> {
        self.progress_tx.subscribe()
    }

    /// Whether this process is currently dispatching `job_id`.
    pub fn is_running(&self, job_id: JobId) -> bool {
        self.get_state(job_id).is_some()
    }

    /// Persist a new `queued` job for `items`. An empty list is rejected.
    pub async fn create_job(&self, items: &[String], title: Option<&str>) -> JobResult<JobId> {
        if items.is_empty() {
            return Err(JobError::EmptyItems);
        }
        let job_id = JobId::new();
        if !self
            .db
            .create_job(&job_id.to_string(), items.len() as u64, title)
            .await?
        {
            return Err(JobError::AlreadyExists { job_id });
        }
        metrics::record_job_created();
        info!(job_id = %job_id, total_items = items.len(), "Job created");
        Ok(job_id)
    }

    /// Create a job, point the active-job pointer at it, and start it.
    ///
    /// The pointer is written before dispatch begins, so it is visible to any
    /// client by the time this returns and a fast job's compare-and-clear
    /// still finds it.
    pub async fn submit(
        self: &Arc<Self>,
        items: Vec<String>,
        title: Option<&str>,
        work: Arc<dyn ItemWork>,
    ) -> JobResult<JobId> {
        let job_id = self.create_job(&items, title).await?;
        let key = job_id.to_string();

        let started = match self.db.set_active_job(&key, title).await {
            Ok(()) => self.start_job(&key, work, items).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = started {
            error!(job_id = %job_id, error = %e, "Job failed to start");
            if let Err(cleanup) = self.abandon(&key, &e).await {
                warn!(job_id = %job_id, error = %cleanup, "Failed to clean up unstarted job");
            }
            return Err(e);
        }
        Ok(job_id)
    }

    async fn abandon(&self, key: &str, cause: &JobError) -> JobResult<()> {
        let message = cause.to_string();
        self.db
            .update_job_status(key, JobStatus::Failed, Some(&message))
            .await?;
        self.db.clear_active_job_if_current(key).await?;
        Ok(())
    }

    /// Start executing a `queued` job.
    ///
    /// Rejects malformed ids, unknown jobs, jobs not in `queued` and item
    /// lists whose length differs from the persisted total. The guarded
    /// `queued → processing` transition in the store arbitrates concurrent
    /// starts, including starts from other processes, so a job's items run
    /// at most once.
    pub async fn start_job(
        self: &Arc<Self>,
        job_id: &str,
        work: Arc<dyn ItemWork>,
        items: Vec<String>,
    ) -> JobResult<()> {
        let id = JobId::parse(job_id)?;
        let key = id.to_string();

        let summary = self
            .db
            .get_job_summary(&key)
            .await?
            .ok_or(JobError::NotFound(id))?;
        if summary.status != JobStatus::Queued {
            return Err(JobError::NotQueued {
                job_id: id,
                status: summary.status,
            });
        }
        if items.len() as u64 != summary.total_items {
            return Err(JobError::ItemCountMismatch {
                job_id: id,
                expected: summary.total_items,
                actual: items.len() as u64,
            });
        }

        if !self
            .db
            .update_job_status(&key, JobStatus::Processing, None)
            .await?
        {
            let status = self.current_status(id).await?;
            return Err(JobError::NotQueued { job_id: id, status });
        }

        let state = Arc::new(JobState::new(id, summary.total_items));
        self.insert_state(Arc::clone(&state));
        metrics::record_job_started();
        let _ = self
            .progress_tx
            .send(state.snapshot(JobStatus::Processing));
        info!(
            job_id = %id,
            total_items = summary.total_items,
            workers = self.worker_count,
            "Job started"
        );

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run(state, work, items).await;
        });
        Ok(())
    }

    /// Request cancellation and return the job's status as stored afterwards.
    ///
    /// A job dispatched by this process has its token cancelled: in-flight
    /// items finish, the rest are skipped, and the row becomes `cancelled`
    /// once the loop drains. Until then the reply is `processing`, and a job
    /// whose loop already settled on another terminal status reports that
    /// status. Any other non-terminal job (queued, or running in another
    /// process) is cancelled directly in the store; an owning process notices
    /// when its next append is refused. Terminal jobs are left as they are.
    pub async fn cancel_job(&self, job_id: &str) -> JobResult<JobStatus> {
        let id = JobId::parse(job_id)?;
        if let Some(state) = self.get_state(id) {
            state.cancel();
            info!(job_id = %id, "Cancellation requested");
            return self.current_status(id).await;
        }

        let key = id.to_string();
        let summary = self
            .db
            .get_job_summary(&key)
            .await?
            .ok_or(JobError::NotFound(id))?;
        if summary.status.is_terminal() {
            return Ok(summary.status);
        }

        if !self
            .db
            .update_job_status(&key, JobStatus::Cancelled, None)
            .await?
        {
            // Lost a race with another terminal transition.
            return self.current_status(id).await;
        }
        self.db.clear_active_job_if_current(&key).await?;
        if summary.status == JobStatus::Queued {
            metrics::record_job_finished(JobStatus::Cancelled);
        }
        if let Some(updated) = self.db.get_job_summary(&key).await? {
            let _ = self.progress_tx.send(JobProgress::from(&updated));
        }
        info!(job_id = %id, previous = %summary.status, "Job cancelled in store");
        Ok(JobStatus::Cancelled)
    }

    /// Counters and status for one job.
    pub async fn get_job_status(&self, job_id: &str) -> JobResult<JobSummary> {
        let id = JobId::parse(job_id)?;
        self.db
            .get_job_summary(&id.to_string())
            .await?
            .ok_or(JobError::NotFound(id))
    }

    /// Full job including results.
    pub async fn get_job(&self, job_id: &str) -> JobResult<Job> {
        let id = JobId::parse(job_id)?;
        self.db
            .get_job(&id.to_string())
            .await?
            .ok_or(JobError::NotFound(id))
    }

    pub async fn list_jobs(&self, limit: u32) -> JobResult<Vec<JobSummary>> {
        Ok(self.db.list_jobs(limit.clamp(1, MAX_LIST_LIMIT)).await?)
    }

    /// Cancel local execution if any, remove the row and its results, and
    /// compare-and-clear the pointer.
    pub async fn delete_job(&self, job_id: &str) -> JobResult<()> {
        let id = JobId::parse(job_id)?;
        if let Some(state) = self.get_state(id) {
            state.cancel();
        }
        let key = id.to_string();
        if !self.db.delete_job(&key).await? {
            return Err(JobError::NotFound(id));
        }
        self.db.clear_active_job_if_current(&key).await?;
        info!(job_id = %id, "Job deleted");
        Ok(())
    }

    async fn current_status(&self, id: JobId) -> JobResult<JobStatus> {
        self.db
            .get_job_summary(&id.to_string())
            .await?
            .map(|s| s.status)
            .ok_or(JobError::NotFound(id))
    }

    /// Drive one job to a terminal state.
    async fn run(self: Arc<Self>, state: Arc<JobState>, work: Arc<dyn ItemWork>, items: Vec<String>) {
        let started = Instant::now();
        let job_id = state.job_id();
        let key = job_id.to_string();

        let (target, failure) = match self.dispatch(&state, work, items).await {
            Ok(()) if state.is_cancelled() => (JobStatus::Cancelled, None),
            Ok(()) => (JobStatus::Completed, None),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Job dispatch failed");
                (JobStatus::Failed, Some(e.to_string()))
            }
        };

        let status = match self.finish(&key, target, failure.as_deref()).await {
            Ok(status) => status,
            Err(e) => {
                // Row stays non-terminal; the next startup sweep fails it.
                error!(job_id = %job_id, error = %e, "Failed to persist final job status");
                target
            }
        };

        self.remove_state(job_id);
        let elapsed = started.elapsed();
        metrics::record_job_stopped(status, elapsed);
        info!(
            job_id = %job_id,
            status = %status,
            processed = state.processed(),
            duration_ms = elapsed.as_millis() as u64,
            "Job finished"
        );
    }

    /// Persist the terminal status, compare-and-clear the pointer, broadcast.
    /// Returns the status the row actually holds afterwards.
    async fn finish(&self, key: &str, target: JobStatus, error: Option<&str>) -> JobResult<JobStatus> {
        self.db.update_job_status(key, target, error).await?;
        self.db.clear_active_job_if_current(key).await?;
        match self.db.get_job_summary(key).await? {
            Some(summary) => {
                let _ = self.progress_tx.send(JobProgress::from(&summary));
                Ok(summary.status)
            }
            // Deleted while running.
            None => Ok(target),
        }
    }

    /// Hand items to the worker pool until they run out, the token is
    /// cancelled, or a worker reports a store error. Always drains in-flight
    /// items before returning.
    async fn dispatch(
        &self,
        state: &Arc<JobState>,
        work: Arc<dyn ItemWork>,
        items: Vec<String>,
    ) -> JobResult<()> {
        let token = state.cancel_token().clone();
        let mut in_flight: JoinSet<JobResult<()>> = JoinSet::new();
        let mut failure: Option<JobError> = None;

        for item in items {
            while let Some(joined) = in_flight.try_join_next() {
                keep_first_error(&mut failure, joined);
            }
            if failure.is_some() {
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                acquired = Arc::clone(&self.workers).acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    Err(e) => {
                        failure = Some(e.into());
                        break;
                    }
                },
            };
            if token.is_cancelled() {
                break;
            }

            let task = ItemTask {
                db: self.db.clone(),
                state: Arc::clone(state),
                progress_tx: self.progress_tx.clone(),
                work: Arc::clone(&work),
            };
            in_flight.spawn(async move {
                let _permit = permit;
                task.run(item).await
            });
        }

        if token.is_cancelled() {
            debug!(job_id = %state.job_id(), in_flight = in_flight.len(), "Dispatch stopped, draining");
        }
        while let Some(joined) = in_flight.join_next().await {
            keep_first_error(&mut failure, joined);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn insert_state(&self, state: Arc<JobState>) {
        match self.jobs.write() {
            Ok(mut jobs) => {
                jobs.insert(state.job_id(), state);
            }
            Err(e) => error!("RwLock poisoned writing jobs map: {e}"),
        }
    }

    fn get_state(&self, job_id: JobId) -> Option<Arc<JobState>> {
        match self.jobs.read() {
            Ok(jobs) => jobs.get(&job_id).cloned(),
            Err(e) => {
                error!("RwLock poisoned reading jobs map: {e}");
                None
            }
        }
    }

    fn remove_state(&self, job_id: JobId) {
        match self.jobs.write() {
            Ok(mut jobs) => {
                jobs.remove(&job_id);
            }
            Err(e) => error!("RwLock poisoned writing jobs map: {e}"),
        }
    }
}

/// One item's worth of work, detached from the manager so it can move into a task.
struct ItemTask {
    db: Database,
    state: Arc<JobState>,
    progress_tx: broadcast::Sender<JobProgress>,
    work: Arc<dyn ItemWork>,
}

impl ItemTask {
    async fn run(self, item: String) -> JobResult<()> {
        let job_id = self.state.job_id();
        let result = invoke(self.work, item).await;
        let success = result.is_success();

        if self.db.add_job_result(&job_id.to_string(), &result).await? {
            self.state.record(success);
            metrics::record_item(success);
            let _ = self
                .progress_tx
                .send(self.state.snapshot(JobStatus::Processing));
        } else {
            // The row left `processing` elsewhere: cancelled, failed or deleted.
            if !self.state.is_cancelled() {
                info!(job_id = %job_id, item = %result.item_key, "Result refused by store, stopping dispatch");
            }
            self.state.cancel();
        }
        Ok(())
    }
}

/// Run the work function on the blocking pool. Returned errors and panics
/// both become error results.
async fn invoke(work: Arc<dyn ItemWork>, item: String) -> ItemResult {
    let key = item.clone();
    match tokio::task::spawn_blocking(move || work.invoke(&item)).await {
        Ok(Ok(detail)) => ItemResult::success(key, detail),
        Ok(Err(e)) => ItemResult::error(key, e.message()),
        Err(join_err) => {
            let reason = panic_reason(join_err);
            warn!(item = %key, reason = %reason, "Item work panicked");
            ItemResult::error(key, format!("panicked: {reason}"))
        }
    }
}

fn panic_reason(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(err) => err.to_string(),
    }
}

fn keep_first_error(failure: &mut Option<JobError>, joined: Result<JobResult<()>, JoinError>) {
    let err = match joined {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(e) => JobError::Worker(e.to_string()),
    };
    match failure {
        None => *failure = Some(err),
        Some(_) => warn!(error = %err, "Additional worker error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobkeeper_core::{WorkError, WorkResult};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    async fn setup(workers: usize) -> (Arc<JobManager>, Database) {
        let db = Database::new_in_memory().await.unwrap();
        (Arc::new(JobManager::new(db.clone(), workers)), db)
    }

    fn items(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn ok_work() -> Arc<dyn ItemWork> {
        Arc::new(|_item: &str| -> WorkResult { Ok(None) })
    }

    async fn wait_terminal(manager: &JobManager, id: JobId) -> JobSummary {
        for _ in 0..500 {
            let summary = manager.get_job_status(&id.to_string()).await.unwrap();
            if summary.status.is_terminal() && !manager.is_running(id) {
                return summary;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not reach a terminal state");
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    /// Work that blocks each item until the test releases it.
    struct GatedWork {
        started: Arc<AtomicUsize>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ItemWork for GatedWork {
        fn invoke(&self, _item: &str) -> WorkResult {
            self.started.fetch_add(1, Ordering::SeqCst);
            let release = self.release.lock().map_err(|_| WorkError::new("gate poisoned"))?;
            release.recv().map_err(|_| WorkError::new("gate closed"))?;
            Ok(None)
        }
    }

    fn gated() -> (Arc<dyn ItemWork>, Arc<AtomicUsize>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let started = Arc::new(AtomicUsize::new(0));
        let work = GatedWork {
            started: Arc::clone(&started),
            release: Mutex::new(rx),
        };
        (Arc::new(work), started, tx)
    }

    #[tokio::test]
    async fn test_item_failure_does_not_fail_job() {
        let (manager, _db) = setup(2).await;
        let work: Arc<dyn ItemWork> = Arc::new(|item: &str| -> WorkResult {
            if item == "b" {
                Err("cannot read b".into())
            } else {
                Ok(Some(format!("did {item}")))
            }
        });

        let id = manager.create_job(&items(&["a", "b", "c"]), None).await.unwrap();
        manager
            .start_job(&id.to_string(), work, items(&["a", "b", "c"]))
            .await
            .unwrap();

        let summary = wait_terminal(&manager, id).await;
        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(summary.processed_items, 3);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.percentage(), 100.0);

        let job = manager.get_job(&id.to_string()).await.unwrap();
        let b = job.results.iter().find(|r| r.item_key == "b").unwrap();
        assert!(!b.is_success());
        assert_eq!(b.detail.as_deref(), Some("cannot read b"));
        assert_eq!(job.error, None);
    }

    #[tokio::test]
    async fn test_all_items_failing_still_completes() {
        let (manager, _db) = setup(3).await;
        let work: Arc<dyn ItemWork> =
            Arc::new(|_item: &str| -> WorkResult { Err("nope".into()) });
        let keys = items(&["x", "y", "z", "w"]);

        let id = manager.create_job(&keys, None).await.unwrap();
        manager.start_job(&id.to_string(), work, keys).await.unwrap();

        let summary = wait_terminal(&manager, id).await;
        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(summary.error_count, 4);
        assert_eq!(summary.success_count, 0);
    }

    #[tokio::test]
    async fn test_panicking_item_becomes_error_result() {
        let (manager, _db) = setup(1).await;
        let work: Arc<dyn ItemWork> = Arc::new(|item: &str| -> WorkResult {
            if item == "boom" {
                panic!("exploded on {item}");
            }
            Ok(None)
        });
        let keys = items(&["ok", "boom", "fine"]);

        let id = manager.create_job(&keys, None).await.unwrap();
        manager.start_job(&id.to_string(), work, keys).await.unwrap();

        let summary = wait_terminal(&manager, id).await;
        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(summary.error_count, 1);

        let job = manager.get_job(&id.to_string()).await.unwrap();
        let boom = job.results.iter().find(|r| r.item_key == "boom").unwrap();
        assert!(boom.detail.as_deref().unwrap().contains("exploded on boom"));
    }

    #[tokio::test]
    async fn test_double_start_executes_once() {
        let (manager, _db) = setup(2).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let work: Arc<dyn ItemWork> = Arc::new(move |_item: &str| -> WorkResult {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });
        let keys = items(&["a", "b", "c"]);

        let id = manager.create_job(&keys, None).await.unwrap();
        let key = id.to_string();
        let (first, second) = tokio::join!(
            manager.start_job(&key, Arc::clone(&work), keys.clone()),
            manager.start_job(&key, Arc::clone(&work), keys.clone()),
        );
        assert!(first.is_ok() != second.is_ok(), "exactly one start wins");

        wait_terminal(&manager, id).await;
        let again = manager.start_job(&key, work, keys).await;
        assert!(matches!(
            again,
            Err(JobError::NotQueued {
                status: JobStatus::Completed,
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancel_skips_undispatched_items() {
        let (manager, _db) = setup(1).await;
        let (work, started, release) = gated();
        let keys = items(&["1", "2", "3", "4", "5"]);

        let id = manager.create_job(&keys, None).await.unwrap();
        manager.start_job(&id.to_string(), work, keys).await.unwrap();

        release.send(()).unwrap();
        release.send(()).unwrap();
        wait_until(|| started.load(Ordering::SeqCst) == 3).await;

        // Draining has not finished, so the row is still processing.
        let status = manager.cancel_job(&id.to_string()).await.unwrap();
        assert_eq!(status, JobStatus::Processing);
        // Let the in-flight third item finish.
        release.send(()).unwrap();

        let summary = wait_terminal(&manager, id).await;
        assert_eq!(summary.status, JobStatus::Cancelled);
        assert_eq!(summary.processed_items, 3);
        assert!(summary.processed_items <= summary.total_items);
        assert_eq!(started.load(Ordering::SeqCst), 3, "nothing past the cut ran");
    }

    #[tokio::test]
    async fn test_cancel_from_another_manager_stops_dispatch() {
        let (owner, db) = setup(1).await;
        let other = JobManager::new(db.clone(), 1);
        let (work, started, release) = gated();
        let keys = items(&["a", "b", "c", "d"]);

        let id = owner.create_job(&keys, None).await.unwrap();
        owner.start_job(&id.to_string(), work, keys).await.unwrap();

        release.send(()).unwrap();
        wait_until(|| started.load(Ordering::SeqCst) == 2).await;

        assert!(!other.is_running(id));
        assert_eq!(
            other.cancel_job(&id.to_string()).await.unwrap(),
            JobStatus::Cancelled
        );
        // Second item finishes, its append is refused, and dispatch stops.
        release.send(()).unwrap();

        let summary = wait_terminal(&owner, id).await;
        assert_eq!(summary.status, JobStatus::Cancelled);
        assert_eq!(summary.processed_items, 1);
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let (manager, db) = setup(1).await;
        let keys = items(&["a"]);
        let id = manager.create_job(&keys, None).await.unwrap();
        db.set_active_job(&id.to_string(), None).await.unwrap();

        let status = manager.cancel_job(&id.to_string()).await.unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        assert!(!db.get_active_job().await.unwrap().is_set());

        // Cancelled jobs cannot be started, and cancelling again is a no-op.
        let err = manager
            .start_job(&id.to_string(), ok_work(), keys)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotQueued { .. }));
        assert_eq!(
            manager.cancel_job(&id.to_string()).await.unwrap(),
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_cancel_after_local_completion_reports_stored_status() {
        let (manager, db) = setup(1).await;
        let id = manager.create_job(&items(&["a"]), None).await.unwrap();
        let key = id.to_string();
        db.update_job_status(&key, JobStatus::Processing, None)
            .await
            .unwrap();
        db.update_job_status(&key, JobStatus::Completed, None)
            .await
            .unwrap();
        // The loop has persisted `completed` but not yet deregistered.
        manager.insert_state(Arc::new(JobState::new(id, 1)));

        let status = manager.cancel_job(&key).await.unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(
            manager.get_job_status(&key).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_submit_fails_job_when_pointer_write_fails() {
        let (manager, db) = setup(1).await;
        sqlx::query("DROP TABLE active_job")
            .execute(db.pool())
            .await
            .unwrap();

        let err = manager
            .submit(items(&["a"]), Some("doomed"), ok_work())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Db(_)));

        let jobs = manager.list_jobs(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].processed_items, 0);
        assert!(jobs[0].error.is_some());
        assert!(!manager.is_running(jobs[0].job_id));
    }

    #[tokio::test]
    async fn test_malformed_ids_are_rejected() {
        let (manager, _db) = setup(1).await;
        for bad in ["", "abc", "6f1c2d3e4a5b6c7d8e9fa0b1c2d3e4f5"] {
            assert!(matches!(
                manager.start_job(bad, ok_work(), items(&["a"])).await,
                Err(JobError::InvalidId(_))
            ));
            assert!(matches!(
                manager.cancel_job(bad).await,
                Err(JobError::InvalidId(_))
            ));
            assert!(matches!(
                manager.get_job_status(bad).await,
                Err(JobError::InvalidId(_))
            ));
            assert!(matches!(
                manager.delete_job(bad).await,
                Err(JobError::InvalidId(_))
            ));
        }
        assert!(manager.list_jobs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (manager, _db) = setup(1).await;
        let id = JobId::new();
        assert!(matches!(
            manager.get_job_status(&id.to_string()).await,
            Err(JobError::NotFound(found)) if found == id
        ));
        assert!(matches!(
            manager.start_job(&id.to_string(), ok_work(), items(&["a"])).await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_items_rejected() {
        let (manager, _db) = setup(1).await;
        assert!(matches!(
            manager.create_job(&[], Some("nothing")).await,
            Err(JobError::EmptyItems)
        ));
    }

    #[tokio::test]
    async fn test_item_count_must_match() {
        let (manager, _db) = setup(1).await;
        let id = manager.create_job(&items(&["a", "b"]), None).await.unwrap();
        let err = manager
            .start_job(&id.to_string(), ok_work(), items(&["a"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::ItemCountMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
        assert_eq!(
            manager.get_job_status(&id.to_string()).await.unwrap().status,
            JobStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_submit_sets_pointer_before_returning() {
        let (manager, db) = setup(1).await;
        let (work, _started, release) = gated();

        let id = manager
            .submit(items(&["a"]), Some("Tagging 1 file"), work)
            .await
            .unwrap();

        let active = db.get_active_job().await.unwrap();
        assert_eq!(active.job_id, Some(id));
        assert_eq!(active.title.as_deref(), Some("Tagging 1 file"));

        release.send(()).unwrap();
        wait_terminal(&manager, id).await;
        assert!(!db.get_active_job().await.unwrap().is_set());
    }

    #[tokio::test]
    async fn test_rapid_submits_last_pointer_wins() {
        let (manager, db) = setup(2).await;
        let (work, started, release) = gated();

        let first = manager
            .submit(items(&["a"]), Some("first"), Arc::clone(&work))
            .await
            .unwrap();
        let second = manager
            .submit(items(&["b"]), Some("second"), work)
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(db.get_active_job().await.unwrap().job_id, Some(second));

        wait_until(|| started.load(Ordering::SeqCst) == 2).await;
        release.send(()).unwrap();
        release.send(()).unwrap();
        wait_terminal(&manager, first).await;
        wait_terminal(&manager, second).await;

        // Only the second job's own completion can clear its pointer.
        assert!(!db.get_active_job().await.unwrap().is_set());
        assert_eq!(manager.list_jobs(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_first_completion_keeps_newer_pointer() {
        let (manager, db) = setup(1).await;
        let first = manager
            .submit(items(&["a"]), Some("first"), ok_work())
            .await
            .unwrap();
        wait_terminal(&manager, first).await;

        let newer = JobId::new();
        db.create_job(&newer.to_string(), 1, None).await.unwrap();
        db.set_active_job(&newer.to_string(), Some("newer"))
            .await
            .unwrap();
        // A late delete of the first job leaves the newer pointer alone.
        manager.delete_job(&first.to_string()).await.unwrap();
        assert_eq!(db.get_active_job().await.unwrap().job_id, Some(newer));
    }

    #[tokio::test]
    async fn test_delete_running_job() {
        let (manager, db) = setup(1).await;
        let (work, started, release) = gated();
        let id = manager
            .submit(items(&["a", "b", "c"]), None, work)
            .await
            .unwrap();
        wait_until(|| started.load(Ordering::SeqCst) == 1).await;

        manager.delete_job(&id.to_string()).await.unwrap();
        assert!(!db.get_active_job().await.unwrap().is_set());
        release.send(()).unwrap();

        wait_until(|| !manager.is_running(id)).await;
        assert!(db.get_job(&id.to_string()).await.unwrap().is_none());
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(matches!(
            manager.delete_job(&id.to_string()).await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_progress_is_broadcast() {
        let (manager, _db) = setup(1).await;
        let mut rx = manager.subscribe();
        let keys = items(&["a", "b"]);
        let id = manager.create_job(&keys, None).await.unwrap();
        manager
            .start_job(&id.to_string(), ok_work(), keys)
            .await
            .unwrap();

        let mut last = None;
        while let Ok(Ok(progress)) =
            tokio::time::timeout(Duration::from_secs(2), rx.recv()).await
        {
            assert_eq!(progress.job_id, id);
            let done = progress.status.is_terminal();
            last = Some(progress);
            if done {
                break;
            }
        }
        let last = last.unwrap();
        assert_eq!(last.status, JobStatus::Completed);
        assert_eq!(last.processed, 2);
        assert_eq!(last.success, 2);
    }
}
