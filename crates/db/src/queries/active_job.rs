//! Active-job pointer: the singleton row naming the job a UI should display.
//!
//! Lives in the shared store rather than process memory so every server
//! process observes the same value.

use jobkeeper_core::{ActiveJob, JobId};
use tracing::debug;

use crate::{gate_job_id, now_secs, Database, DbResult};

impl Database {
    /// Current pointer value; both fields `None` when nothing is active.
    pub async fn get_active_job(&self) -> DbResult<ActiveJob> {
        let row: Option<(Option<String>, Option<String>, i64)> =
            sqlx::query_as("SELECT job_id, title, updated_at FROM active_job WHERE id = 1")
                .fetch_optional(self.pool())
                .await?;

        let Some((raw_id, title, updated_at)) = row else {
            return Ok(ActiveJob::default());
        };
        let job_id = raw_id.as_deref().map(JobId::parse).transpose()?;
        Ok(ActiveJob {
            job_id,
            title: if job_id.is_some() { title } else { None },
            updated_at,
        })
    }

    /// Point the UI at `job_id`.
    ///
    /// Unlike the job store, a malformed id is an error here, not a no-op: a
    /// caller passing garbage to the pointer has broken its contract.
    pub async fn set_active_job(&self, job_id: &str, title: Option<&str>) -> DbResult<()> {
        let id = JobId::parse(job_id)?;
        sqlx::query("UPDATE active_job SET job_id = ?, title = ?, updated_at = ? WHERE id = 1")
            .bind(id.to_string())
            .bind(title)
            .bind(now_secs())
            .execute(self.pool())
            .await?;
        debug!(job_id = %id, "Active job set");
        Ok(())
    }

    /// Reset the pointer. Idempotent.
    pub async fn clear_active_job(&self) -> DbResult<()> {
        sqlx::query("UPDATE active_job SET job_id = NULL, title = NULL, updated_at = ? WHERE id = 1")
            .bind(now_secs())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Clear the pointer only if it still names `job_id`.
    ///
    /// Keeps a late completion from clobbering a pointer already reassigned
    /// to a newer job. Returns whether it cleared.
    pub async fn clear_active_job_if_current(&self, job_id: &str) -> DbResult<bool> {
        let Some(id) = gate_job_id(job_id, "clear_active_job_if_current") else {
            return Ok(false);
        };
        let result = sqlx::query(
            "UPDATE active_job SET job_id = NULL, title = NULL, updated_at = ? WHERE id = 1 AND job_id = ?",
        )
        .bind(now_secs())
        .bind(id.to_string())
        .execute(self.pool())
        .await?;
        let cleared = result.rows_affected() > 0;
        if cleared {
            debug!(job_id = %id, "Active job cleared");
        }
        Ok(cleared)
    }
}
