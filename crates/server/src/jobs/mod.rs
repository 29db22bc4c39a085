// crates/server/src/jobs/mod.rs
//! Job execution for this process.
//!
//! Provides:
//! - `JobManager`: creates jobs, dispatches items to the bounded worker pool,
//!   reconciles final status
//! - `JobState`: atomic progress and the cancellation token per running job
//! - `JobProgress`: SSE-compatible progress updates

pub mod manager;
pub mod state;
pub mod types;

pub use manager::JobManager;
pub use state::JobState;
pub use types::{JobError, JobProgress, JobResult};
