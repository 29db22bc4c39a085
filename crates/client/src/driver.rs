// crates/client/src/driver.rs
//! Async driver that runs a [`PollMachine`] against a live server.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use jobkeeper_core::JobId;
use tracing::{debug, info, warn};

use crate::api::{JobStatusView, JobsApi};
use crate::backoff::BackoffPolicy;
use crate::error::ClientResult;
use crate::machine::{Effect, Notice, PollEvent, PollMachine, PollState};

/// Clock seam so tests can record delays instead of waiting them out.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How a drive ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// No active job on page load.
    NothingToResume,
    /// The job reached a terminal state.
    Finished(JobStatusView),
    /// The job no longer exists on the server.
    Gone,
    /// Retry budget spent; the job may still be running.
    LostConnection,
}

pub struct JobPoller<S = TokioSleeper> {
    api: JobsApi,
    machine: PollMachine,
    sleeper: S,
}

impl JobPoller<TokioSleeper> {
    pub fn new(api: JobsApi) -> Self {
        Self::with_sleeper(api, BackoffPolicy::default(), TokioSleeper)
    }
}

impl<S: Sleeper> JobPoller<S> {
    pub fn with_sleeper(api: JobsApi, policy: BackoffPolicy, sleeper: S) -> Self {
        Self {
            api,
            machine: PollMachine::new(policy),
            sleeper,
        }
    }

    pub fn state(&self) -> &PollState {
        self.machine.state()
    }

    pub fn should_warn_on_unload(&self) -> bool {
        self.machine.should_warn_on_unload()
    }

    /// Page-load path: read the pointer and follow whatever it names.
    ///
    /// UI effects are handed to `view` in order.
    pub async fn resume<F>(&mut self, view: F) -> ClientResult<PollOutcome>
    where
        F: FnMut(&Effect) + Send,
    {
        let active = self.api.get_active_job().await?;
        let effects = self.machine.handle(PollEvent::PageLoaded {
            active: active.job_id,
        });
        Ok(self.drive(effects, view).await)
    }

    /// Create and start a job, then follow it to the end.
    pub async fn start<F>(&mut self, items: &[String], title: Option<&str>, view: F) -> ClientResult<PollOutcome>
    where
        F: FnMut(&Effect) + Send,
    {
        let created = self.api.create_job(items, title).await?;
        info!(job_id = %created.job_id, total_items = created.total_items, "Job created");
        Ok(self.follow(created.job_id, view).await)
    }

    /// Follow a job that was started elsewhere.
    pub async fn follow<F>(&mut self, job_id: JobId, view: F) -> PollOutcome
    where
        F: FnMut(&Effect) + Send,
    {
        let effects = self.machine.handle(PollEvent::JobStarted { job_id });
        self.drive(effects, view).await
    }

    async fn drive<F>(&mut self, effects: Vec<Effect>, mut view: F) -> PollOutcome
    where
        F: FnMut(&Effect) + Send,
    {
        let mut queue: VecDeque<Effect> = effects.into();
        let mut outcome = PollOutcome::NothingToResume;

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::FetchStatus { job_id, after } => {
                    if !after.is_zero() {
                        self.sleeper.sleep(after).await;
                    }
                    let event = match self.api.get_job_status(job_id).await {
                        Ok(status) => PollEvent::StatusFetched(status),
                        Err(e) => {
                            debug!(job_id = %job_id, error = %e, "Status fetch failed");
                            PollEvent::FetchFailed {
                                job_id,
                                error: e.to_fetch_error(),
                            }
                        }
                    };
                    queue.extend(self.machine.handle(event));
                }
                Effect::ClearPointer { job_id } => {
                    match self.api.clear_active_job_if_current(job_id).await {
                        Ok(cleared) => debug!(job_id = %job_id, cleared, "Pointer compare-and-clear"),
                        Err(e) => warn!(job_id = %job_id, error = %e, "Failed to clear active-job pointer"),
                    }
                }
                other => {
                    match &other {
                        Effect::ShowResult(status) => outcome = PollOutcome::Finished(status.clone()),
                        Effect::Notice(Notice::JobGone) => outcome = PollOutcome::Gone,
                        Effect::Notice(Notice::LostConnection) => {
                            warn!("Giving up polling; job may still be running");
                            outcome = PollOutcome::LostConnection;
                        }
                        _ => {}
                    }
                    view(&other);
                }
            }
        }
        outcome
    }
}
