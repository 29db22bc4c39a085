// crates/server/src/sweeper.rs
//! Startup orphan reconciliation and the periodic retention sweep.

use std::time::Duration;

use jobkeeper_db::{Database, DbResult};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;

/// Unix seconds `age` before now, clamped so huge ages land in the past.
fn secs_ago(age: Duration) -> i64 {
    let age = i64::try_from(age.as_secs()).unwrap_or(i64::MAX);
    chrono::Utc::now().timestamp().saturating_sub(age)
}

/// Fail non-terminal jobs left behind by a dead process.
///
/// Only rows untouched for `stale_after` are considered: a younger row may
/// belong to a live sibling process. Returns how many jobs were failed.
pub async fn reconcile_orphans(db: &Database, stale_after: Duration) -> DbResult<usize> {
    let reconciled = db.reconcile_orphaned_jobs(secs_ago(stale_after)).await?;
    if !reconciled.is_empty() {
        warn!(
            count = reconciled.len(),
            stale_after_secs = stale_after.as_secs(),
            "Failed orphaned jobs at startup"
        );
        metrics::record_orphans_reconciled(reconciled.len() as u64);
    }
    Ok(reconciled.len())
}

/// Purge terminal jobs that finished more than `retention` ago.
pub async fn purge_expired(db: &Database, retention: Duration) -> DbResult<u64> {
    let purged = db.purge_expired_jobs(secs_ago(retention)).await?;
    if purged > 0 {
        metrics::record_jobs_purged(purged);
    }
    Ok(purged)
}

/// Run [`purge_expired`] every `interval` until `shutdown` fires.
pub fn spawn_retention_sweeper(
    db: Database,
    retention: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            retention_secs = retention.as_secs(),
            interval_secs = interval.as_secs(),
            "Retention sweeper started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            match purge_expired(&db, retention).await {
                Ok(purged) => debug!(purged, "Retention sweep complete"),
                Err(e) => warn!(error = %e, "Retention sweep failed (non-fatal)"),
            }
        }
        debug!("Retention sweeper stopped");
    })
}
