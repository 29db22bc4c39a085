// crates/server/src/config.rs
//! Command-line and environment configuration for the server binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47893;

#[derive(Debug, Clone, Parser)]
#[command(name = "jobkeeper", version, about = "Durable batch-job server")]
pub struct Config {
    /// Port to listen on (127.0.0.1).
    #[arg(long, env = "JOBKEEPER_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Job store path. Defaults to `<cache dir>/jobkeeper/jobkeeper.db`.
    #[arg(long, env = "JOBKEEPER_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Concurrent item executions in this process. Defaults to available cores.
    #[arg(long, env = "JOBKEEPER_WORKERS")]
    pub workers: Option<usize>,

    /// Terminal jobs older than this are purged.
    #[arg(long, env = "JOBKEEPER_RETENTION_HOURS", default_value_t = 24)]
    pub retention_hours: u64,

    #[arg(long, env = "JOBKEEPER_SWEEP_INTERVAL_SECS", default_value_t = 3600)]
    pub sweep_interval_secs: u64,

    /// Non-terminal jobs untouched for this long are failed at startup.
    #[arg(long, env = "JOBKEEPER_ORPHAN_STALE_SECS", default_value_t = 300)]
    pub orphan_stale_secs: u64,

    /// Emit logs as JSON lines instead of compact text.
    #[arg(long, env = "JOBKEEPER_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn orphan_stale_after(&self) -> Duration {
        Duration::from_secs(self.orphan_stale_secs)
    }
}
