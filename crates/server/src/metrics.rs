//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Job lifecycle counters, the running-jobs gauge and a duration histogram
//! - Helper functions for recording metrics

use std::sync::OnceLock;
use std::time::Duration;

use jobkeeper_core::JobStatus;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("jobkeeper_jobs_created_total", "Jobs created");
    describe_counter!(
        "jobkeeper_jobs_finished_total",
        "Jobs that reached a terminal state, by status"
    );
    describe_gauge!(
        "jobkeeper_jobs_running",
        "Jobs currently dispatching items in this process"
    );
    describe_histogram!(
        "jobkeeper_job_duration_seconds",
        "Wall time from start to terminal state for jobs run in this process"
    );
    describe_counter!(
        "jobkeeper_items_processed_total",
        "Item results recorded, by outcome"
    );
    describe_counter!(
        "jobkeeper_orphans_reconciled_total",
        "Stale jobs failed by the startup sweep"
    );
    describe_counter!(
        "jobkeeper_jobs_purged_total",
        "Terminal jobs removed by the retention sweeper"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_job_created() {
    counter!("jobkeeper_jobs_created_total").increment(1);
}

/// A job entered `processing` in this process.
pub fn record_job_started() {
    gauge!("jobkeeper_jobs_running").increment(1.0);
}

/// A job dispatched by this process stopped running.
pub fn record_job_stopped(status: JobStatus, duration: Duration) {
    gauge!("jobkeeper_jobs_running").decrement(1.0);
    histogram!("jobkeeper_job_duration_seconds", "status" => status.as_str())
        .record(duration.as_secs_f64());
    record_job_finished(status);
}

/// A job reached a terminal state (including jobs this process never ran).
pub fn record_job_finished(status: JobStatus) {
    counter!("jobkeeper_jobs_finished_total", "status" => status.as_str()).increment(1);
}

pub fn record_item(success: bool) {
    let outcome = if success { "success" } else { "error" };
    counter!("jobkeeper_items_processed_total", "outcome" => outcome).increment(1);
}

pub fn record_orphans_reconciled(count: u64) {
    counter!("jobkeeper_orphans_reconciled_total").increment(count);
}

pub fn record_jobs_purged(count: u64) {
    counter!("jobkeeper_jobs_purged_total").increment(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_helpers_do_not_panic() {
        record_job_created();
        record_job_started();
        record_item(true);
        record_job_stopped(JobStatus::Completed, Duration::from_millis(5));
        record_orphans_reconciled(2);
        record_jobs_purged(0);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_metrics();
        assert!(!init_metrics());
        assert!(render_metrics().is_some());
    }
}
