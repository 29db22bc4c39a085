//! Job store CRUD: job rows plus append-only item results.
//!
//! Every entry point takes the raw id string and runs it through the UUID
//! gate first; a malformed id is logged and the call no-ops without touching
//! storage.

use jobkeeper_core::{ItemResult, Job, JobId, JobStatus, JobSummary};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::{gate_job_id, now_secs, Database, DbResult};

/// Error text recorded on jobs failed by the startup orphan sweep.
pub const ORPHANED_JOB_ERROR: &str = "interrupted: owning process exited";

const JOB_COLUMNS: &str = "j.job_id, j.title, j.status, j.total_items, j.processed_items, \
     j.error, j.created_at, j.started_at, j.completed_at, j.updated_at";

const COUNT_COLUMNS: &str = "\
     (SELECT COUNT(*) FROM job_results r WHERE r.job_id = j.job_id AND r.outcome = 'success') AS success_count, \
     (SELECT COUNT(*) FROM job_results r WHERE r.job_id = j.job_id AND r.outcome = 'error') AS error_count";

/// Row fields shared by `Job` and `JobSummary`.
struct JobRow {
    job_id: JobId,
    title: Option<String>,
    status: JobStatus,
    total_items: u64,
    processed_items: u64,
    error: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    updated_at: i64,
}

impl JobRow {
    fn from_row(row: &SqliteRow) -> DbResult<Self> {
        let raw_id: String = row.try_get("job_id")?;
        let raw_status: String = row.try_get("status")?;
        Ok(Self {
            job_id: JobId::parse(&raw_id)?,
            title: row.try_get("title")?,
            status: raw_status.parse()?,
            total_items: row.try_get::<i64, _>("total_items")? as u64,
            processed_items: row.try_get::<i64, _>("processed_items")? as u64,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_summary(self, success_count: u64, error_count: u64) -> JobSummary {
        JobSummary {
            job_id: self.job_id,
            title: self.title,
            status: self.status,
            total_items: self.total_items,
            processed_items: self.processed_items,
            success_count,
            error_count,
            error: self.error,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

fn summary_from_row(row: &SqliteRow) -> DbResult<JobSummary> {
    let success: i64 = row.try_get("success_count")?;
    let errors: i64 = row.try_get("error_count")?;
    Ok(JobRow::from_row(row)?.into_summary(success as u64, errors as u64))
}

fn result_from_row(row: &SqliteRow) -> DbResult<ItemResult> {
    let raw_outcome: String = row.try_get("outcome")?;
    Ok(ItemResult {
        item_key: row.try_get("item_key")?,
        outcome: raw_outcome.parse()?,
        detail: row.try_get("detail")?,
        timestamp: row.try_get("recorded_at")?,
    })
}

impl Database {
    /// Insert a new `queued` job row.
    ///
    /// Returns `false` (and logs) when the id is malformed or a row already
    /// exists. Creation is never an upsert.
    pub async fn create_job(
        &self,
        job_id: &str,
        total_items: u64,
        title: Option<&str>,
    ) -> DbResult<bool> {
        let Some(id) = gate_job_id(job_id, "create_job") else {
            return Ok(false);
        };
        let now = now_secs();
        let result = sqlx::query(
            r#"INSERT INTO jobs (job_id, title, status, total_items, processed_items, created_at, updated_at)
               VALUES (?, ?, 'queued', ?, 0, ?, ?)
               ON CONFLICT(job_id) DO NOTHING"#,
        )
        .bind(id.to_string())
        .bind(title)
        .bind(total_items as i64)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            warn!(job_id = %id, "Job already exists; create ignored");
            return Ok(false);
        }
        debug!(job_id = %id, total_items, "Job created");
        Ok(true)
    }

    /// Move a job to `status`, if the transition is allowed from its current state.
    ///
    /// Entering `processing` stamps `started_at`; entering a terminal state
    /// stamps `completed_at` and records `error` when given. Returns whether
    /// the row changed.
    pub async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> DbResult<bool> {
        let Some(id) = gate_job_id(job_id, "update_job_status") else {
            return Ok(false);
        };
        let from = JobStatus::predecessors(status);
        if from.is_empty() {
            warn!(job_id = %id, status = %status, "No transition leads to this status");
            return Ok(false);
        }

        let now = now_secs();
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = if status == JobStatus::Processing {
            format!(
                "UPDATE jobs SET status = ?, started_at = ?, updated_at = ? \
                 WHERE job_id = ? AND status IN ({placeholders})"
            )
        } else {
            format!(
                "UPDATE jobs SET status = ?, error = COALESCE(?, error), completed_at = ?, updated_at = ? \
                 WHERE job_id = ? AND status IN ({placeholders})"
            )
        };

        let mut query = sqlx::query(&sql).bind(status.as_str());
        query = if status == JobStatus::Processing {
            query.bind(now).bind(now)
        } else {
            query.bind(error).bind(now).bind(now)
        };
        query = query.bind(id.to_string());
        for prev in from {
            query = query.bind(prev.as_str());
        }

        let result = query.execute(self.pool()).await?;
        if result.rows_affected() == 0 {
            debug!(job_id = %id, status = %status, "Status transition not applied");
            return Ok(false);
        }
        debug!(job_id = %id, status = %status, "Job status updated");
        Ok(true)
    }

    /// Append one item result and bump `processed_items` in a single transaction.
    ///
    /// Only applies while the job is `processing` and below its item count.
    /// `false` means the append was refused, usually because the job was
    /// cancelled or failed from elsewhere.
    pub async fn add_job_result(&self, job_id: &str, result: &ItemResult) -> DbResult<bool> {
        let Some(id) = gate_job_id(job_id, "add_job_result") else {
            return Ok(false);
        };
        let key = id.to_string();
        let now = now_secs();

        let mut tx = self.pool().begin().await?;
        let updated = sqlx::query(
            r#"UPDATE jobs SET processed_items = processed_items + 1, updated_at = ?
               WHERE job_id = ? AND status = 'processing' AND processed_items < total_items"#,
        )
        .bind(now)
        .bind(&key)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(job_id = %id, item = %result.item_key, "Result append refused");
            return Ok(false);
        }

        sqlx::query(
            r#"INSERT INTO job_results (job_id, item_key, outcome, detail, recorded_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&key)
        .bind(&result.item_key)
        .bind(result.outcome.as_str())
        .bind(result.detail.as_deref())
        .bind(result.timestamp)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Full job row with results in completion order.
    pub async fn get_job(&self, job_id: &str) -> DbResult<Option<Job>> {
        let Some(id) = gate_job_id(job_id, "get_job") else {
            return Ok(None);
        };
        let key = id.to_string();

        // One read transaction so counters and results come from the same snapshot.
        let mut tx = self.pool().begin().await?;
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs j WHERE j.job_id = ?"))
            .bind(&key)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let job = JobRow::from_row(&row)?;

        let result_rows = sqlx::query(
            "SELECT item_key, outcome, detail, recorded_at FROM job_results WHERE job_id = ? ORDER BY id",
        )
        .bind(&key)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let results = result_rows
            .iter()
            .map(result_from_row)
            .collect::<DbResult<Vec<_>>>()?;

        Ok(Some(Job {
            job_id: job.job_id,
            title: job.title,
            status: job.status,
            total_items: job.total_items,
            processed_items: job.processed_items,
            results,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            updated_at: job.updated_at,
        }))
    }

    /// Counters for one job without loading its results.
    pub async fn get_job_summary(&self, job_id: &str) -> DbResult<Option<JobSummary>> {
        let Some(id) = gate_job_id(job_id, "get_job_summary") else {
            return Ok(None);
        };
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS}, {COUNT_COLUMNS} FROM jobs j WHERE j.job_id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(summary_from_row).transpose()
    }

    /// Most recent jobs first.
    pub async fn list_jobs(&self, limit: u32) -> DbResult<Vec<JobSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS}, {COUNT_COLUMNS} FROM jobs j \
             ORDER BY j.created_at DESC, j.rowid DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(summary_from_row).collect()
    }

    /// Remove a job and its results. Returns whether a row existed.
    pub async fn delete_job(&self, job_id: &str) -> DbResult<bool> {
        let Some(id) = gate_job_id(job_id, "delete_job") else {
            return Ok(false);
        };
        let key = id.to_string();

        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM job_results WHERE job_id = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM jobs WHERE job_id = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }

    /// Purge terminal jobs whose `completed_at` is before `cutoff` (unix secs).
    /// Returns the number of jobs removed.
    pub async fn purge_expired_jobs(&self, cutoff: i64) -> DbResult<u64> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            r#"DELETE FROM job_results WHERE job_id IN (
                   SELECT job_id FROM jobs
                   WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < ?
               )"#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        let deleted = sqlx::query(
            r#"DELETE FROM jobs
               WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < ?"#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let purged = deleted.rows_affected();
        if purged > 0 {
            info!(purged, cutoff, "Purged expired jobs");
        }
        Ok(purged)
    }

    /// Fail every non-terminal job whose last update predates `stale_before`.
    ///
    /// Run at startup: rows left `queued`/`processing` by a dead process never
    /// finish on their own. Fresh rows are untouched since a live sibling
    /// process may own them. The active pointer is compare-and-cleared for
    /// each reconciled job.
    pub async fn reconcile_orphaned_jobs(&self, stale_before: i64) -> DbResult<Vec<JobId>> {
        let candidates: Vec<(String,)> = sqlx::query_as(
            "SELECT job_id FROM jobs WHERE status IN ('queued', 'processing') AND updated_at < ?",
        )
        .bind(stale_before)
        .fetch_all(self.pool())
        .await?;

        let mut reconciled = Vec::new();
        for (raw,) in candidates {
            let Some(id) = gate_job_id(&raw, "reconcile_orphaned_jobs") else {
                continue;
            };
            let now = now_secs();
            let result = sqlx::query(
                r#"UPDATE jobs SET status = 'failed', error = ?, completed_at = ?, updated_at = ?
                   WHERE job_id = ? AND status IN ('queued', 'processing') AND updated_at < ?"#,
            )
            .bind(ORPHANED_JOB_ERROR)
            .bind(now)
            .bind(now)
            .bind(&raw)
            .bind(stale_before)
            .execute(self.pool())
            .await?;
            if result.rows_affected() > 0 {
                self.clear_active_job_if_current(&raw).await?;
                warn!(job_id = %id, "Marked orphaned job as failed");
                reconciled.push(id);
            }
        }
        Ok(reconciled)
    }
}
