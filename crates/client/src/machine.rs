// crates/client/src/machine.rs
//! Poll/resume state machine.
//!
//! Pure and synchronous: [`PollMachine::handle`] takes an event and returns
//! the effects to perform. It never sleeps, fetches or renders, which lets
//! tests replay whole outage scenarios without a clock or a server.
//!
//! ```text
//!  Idle ──PageLoaded(Some)──▶ Resuming ──non-terminal──▶ Polling ◀─┐
//!   ▲                            │                         │  │     │ transient
//!   │        terminal / 404      │        terminal / 404   │  └─────┘ (≤ budget)
//!   └────────────────────────────┴─────────────────────────┘
//!                                              budget spent │
//!                                                           ▼
//!                                                       GivingUp
//! ```

use std::time::Duration;

use jobkeeper_core::JobId;
use tracing::debug;

use crate::api::JobStatusView;
use crate::backoff::BackoffPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Idle,
    /// Page (re)loaded with a pointer; waiting for the first status.
    Resuming { job_id: JobId },
    Polling { job_id: JobId, consecutive_errors: u32 },
    /// Retry budget spent. The server-side pointer is left alone so a later
    /// reload can resume.
    GivingUp { job_id: JobId },
}

impl PollState {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Idle => None,
            Self::Resuming { job_id }
            | Self::Polling { job_id, .. }
            | Self::GivingUp { job_id } => Some(*job_id),
        }
    }
}

/// Why a status fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    NotFound,
    /// Any other 4xx.
    Rejected(u16),
    Server(u16),
    Network,
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Server(_) | Self::Network)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// Result of reading the active-job pointer on page load.
    PageLoaded { active: Option<JobId> },
    /// The user just created and started a job.
    JobStarted { job_id: JobId },
    StatusFetched(JobStatusView),
    FetchFailed { job_id: JobId, error: FetchError },
}

/// Informational messages for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Reconnecting { attempt: u32, retry_in: Duration },
    /// Polling stopped; the job may still be running on the server.
    LostConnection,
    /// The job no longer exists (deleted or purged).
    JobGone,
}

impl Notice {
    pub fn message(&self) -> String {
        match self {
            Self::Reconnecting { attempt, retry_in } => format!(
                "Reconnecting (attempt {attempt}, retrying in {}s)...",
                retry_in.as_secs()
            ),
            Self::LostConnection => {
                "Lost connection. The job may still be running; refresh to check.".to_string()
            }
            Self::JobGone => "This job no longer exists.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchStatus { job_id: JobId, after: Duration },
    ShowProgress(JobStatusView),
    ShowResult(JobStatusView),
    /// Compare-and-clear the server-side pointer.
    ClearPointer { job_id: JobId },
    /// Reload views that depend on what the job changed.
    RefreshDependents,
    Notice(Notice),
    /// Arm or disarm the "leaving only interrupts the display" unload warning.
    SetUnloadGuard(bool),
}

#[derive(Debug, Clone)]
pub struct PollMachine {
    state: PollState,
    policy: BackoffPolicy,
}

impl Default for PollMachine {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl PollMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: PollState::Idle,
            policy,
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Whether navigating away should warn that it only interrupts the display.
    pub fn should_warn_on_unload(&self) -> bool {
        matches!(
            self.state,
            PollState::Resuming { .. } | PollState::Polling { .. }
        )
    }

    pub fn handle(&mut self, event: PollEvent) -> Vec<Effect> {
        match event {
            PollEvent::PageLoaded { active } => self.on_page_loaded(active),
            PollEvent::JobStarted { job_id } => {
                self.state = PollState::Polling {
                    job_id,
                    consecutive_errors: 0,
                };
                vec![
                    Effect::SetUnloadGuard(true),
                    Effect::FetchStatus {
                        job_id,
                        after: self.policy.poll_interval,
                    },
                ]
            }
            PollEvent::StatusFetched(view) => self.on_status(view),
            PollEvent::FetchFailed { job_id, error } => self.on_failure(job_id, error),
        }
    }

    fn on_page_loaded(&mut self, active: Option<JobId>) -> Vec<Effect> {
        match active {
            Some(job_id) => {
                self.state = PollState::Resuming { job_id };
                vec![
                    Effect::SetUnloadGuard(true),
                    Effect::FetchStatus {
                        job_id,
                        after: Duration::ZERO,
                    },
                ]
            }
            None => {
                self.state = PollState::Idle;
                Vec::new()
            }
        }
    }

    fn on_status(&mut self, view: JobStatusView) -> Vec<Effect> {
        let resuming = match &self.state {
            PollState::Resuming { job_id } if *job_id == view.job_id => true,
            PollState::Polling { job_id, .. } if *job_id == view.job_id => false,
            other => {
                debug!(job_id = %view.job_id, state = ?other, "Ignoring stale status");
                return Vec::new();
            }
        };
        let job_id = view.job_id;

        if view.is_terminal() {
            self.state = PollState::Idle;
            let mut effects = vec![Effect::SetUnloadGuard(false), Effect::ShowResult(view)];
            if resuming {
                effects.push(Effect::ClearPointer { job_id });
            } else {
                effects.push(Effect::RefreshDependents);
            }
            return effects;
        }

        self.state = PollState::Polling {
            job_id,
            consecutive_errors: 0,
        };
        vec![
            Effect::ShowProgress(view),
            Effect::FetchStatus {
                job_id,
                after: self.policy.poll_interval,
            },
        ]
    }

    fn on_failure(&mut self, failed: JobId, error: FetchError) -> Vec<Effect> {
        let errors = match &self.state {
            PollState::Resuming { job_id } if *job_id == failed => 0,
            PollState::Polling {
                job_id,
                consecutive_errors,
            } if *job_id == failed => *consecutive_errors,
            _ => return Vec::new(),
        };

        if !error.is_transient() {
            self.state = PollState::Idle;
            return vec![
                Effect::SetUnloadGuard(false),
                Effect::ClearPointer { job_id: failed },
                Effect::Notice(Notice::JobGone),
            ];
        }

        let errors = errors + 1;
        if self.policy.gives_up_after(errors) {
            self.state = PollState::GivingUp { job_id: failed };
            return vec![
                Effect::SetUnloadGuard(false),
                Effect::Notice(Notice::LostConnection),
            ];
        }

        let retry_in = self.policy.delay_for(errors);
        self.state = PollState::Polling {
            job_id: failed,
            consecutive_errors: errors,
        };
        vec![
            Effect::Notice(Notice::Reconnecting {
                attempt: errors,
                retry_in,
            }),
            Effect::FetchStatus {
                job_id: failed,
                after: retry_in,
            },
        ]
    }
}
