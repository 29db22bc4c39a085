// crates/client/src/lib.rs
//! Client side of jobkeeper: the poll/resume state machine and an HTTP
//! driver that runs it against a jobkeeper server.
//!
//! [`PollMachine`] is pure: it consumes [`PollEvent`]s and returns
//! [`Effect`]s, with all timing decided by a [`BackoffPolicy`].
//! [`JobPoller`] performs those effects through [`JobsApi`].

pub mod api;
pub mod backoff;
pub mod driver;
pub mod error;
pub mod machine;

pub use api::{ActiveJobView, CreatedJob, JobStatusView, JobsApi};
pub use backoff::BackoffPolicy;
pub use driver::{JobPoller, PollOutcome, Sleeper, TokioSleeper};
pub use error::{ClientError, ClientResult};
pub use machine::{Effect, FetchError, Notice, PollEvent, PollMachine, PollState};
