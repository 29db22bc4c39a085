// crates/db/src/queries/mod.rs
// Job store and active-job pointer operations for the jobkeeper SQLite database.

pub mod active_job;
pub mod jobs;
