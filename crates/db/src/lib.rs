// crates/db/src/lib.rs
//! SQLite job store shared by every server process on the host.
//!
//! One backing file, WAL journal mode, a generous busy timeout: readers in
//! one process never block on a writer in another for long, and every
//! mutation is its own short transaction.

mod migrations;
mod queries;

pub use queries::active_job::*;
pub use queries::jobs::*;

use jobkeeper_core::{InvalidJobId, JobId, UnknownVariant};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Failed to determine cache directory")]
    NoCacheDir,

    #[error("Failed to create database directory: {0}")]
    CreateDir(#[from] std::io::Error),

    #[error(transparent)]
    InvalidJobId(#[from] InvalidJobId),

    #[error("Corrupt row: {0}")]
    Corrupt(#[from] UnknownVariant),
}

pub type DbResult<T> = Result<T, DbError>;

/// Main database handle wrapping a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl Database {
    /// Open (or create) the database at the given path and run migrations.
    ///
    /// Safe to call from several processes against the same file.
    pub async fn new(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(30))
            .log_slow_statements(
                tracing::log::LevelFilter::Warn,
                std::time::Duration::from_secs(5),
            );

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            db_path: path.to_owned(),
        };
        db.run_migrations().await?;

        info!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    ///
    /// Single connection: with shared-cache memory databases, concurrent
    /// writers on separate connections hit table locks instead of the busy
    /// handler.
    pub async fn new_in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let db = Self {
            pool,
            db_path: PathBuf::new(),
        };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Open the database at the default location: `~/.cache/jobkeeper/jobkeeper.db`
    pub async fn open_default() -> DbResult<Self> {
        let path = default_db_path()?;
        Self::new(&path).await
    }

    /// Run all inline migrations.
    ///
    /// A `_migrations` table records applied versions. Version rows are
    /// inserted with `OR IGNORE` because sibling processes may race through
    /// the same (idempotent) statements on first start.
    async fn run_migrations(&self) -> DbResult<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS _migrations (version INTEGER PRIMARY KEY)")
            .execute(&self.pool)
            .await?;

        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM _migrations")
            .fetch_one(&self.pool)
            .await?;
        let current_version = row.0 as usize;

        for (i, migration) in migrations::MIGRATIONS.iter().enumerate() {
            let version = i + 1; // 1-based
            if version > current_version {
                sqlx::query(migration).execute(&self.pool).await?;
                sqlx::query("INSERT OR IGNORE INTO _migrations (version) VALUES (?)")
                    .bind(version as i64)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the path to the database file.
    /// Returns an empty path for in-memory databases.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

/// Returns the default database path: `~/.cache/jobkeeper/jobkeeper.db`
pub fn default_db_path() -> DbResult<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join("jobkeeper").join("jobkeeper.db"))
        .ok_or(DbError::NoCacheDir)
}

/// Parse a raw id at the store boundary. Malformed ids are logged and
/// reported as `None` so the caller can no-op without touching storage.
pub(crate) fn gate_job_id(raw: &str, op: &'static str) -> Option<JobId> {
    match JobId::parse(raw) {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(op, error = %e, "Rejected malformed job id");
            None
        }
    }
}

pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_database() {
        let db = Database::new_in_memory()
            .await
            .expect("should create in-memory database");

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
            .fetch_one(db.pool())
            .await
            .expect("jobs table should exist");
        assert_eq!(count.0, 0);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM active_job")
            .fetch_one(db.pool())
            .await
            .expect("active_job table should exist");
        assert_eq!(count.0, 1, "singleton pointer row is seeded");
    }

    #[tokio::test]
    async fn test_each_migration_entry_is_a_version() {
        let db = Database::new_in_memory()
            .await
            .expect("should create in-memory database");

        let versions: Vec<(i64,)> = sqlx::query_as("SELECT version FROM _migrations ORDER BY version")
            .fetch_all(db.pool())
            .await
            .expect("_migrations should exist");
        let expected: Vec<(i64,)> = (1..=migrations::MIGRATIONS.len() as i64).map(|v| (v,)).collect();
        assert_eq!(versions, expected);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let db = Database::new_in_memory()
            .await
            .expect("first open should succeed");

        db.run_migrations()
            .await
            .expect("second migration run should succeed");

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM active_job")
            .fetch_one(db.pool())
            .await
            .expect("active_job table should still exist");
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_file_based_database_uses_wal() {
        let tmp = tempfile::tempdir().expect("should create temp dir");
        let db_path = tmp.path().join("nested").join("jobs.db");

        let db = Database::new(&db_path)
            .await
            .expect("should create file-based database");

        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(mode.0.to_lowercase(), "wal");
        assert!(db_path.exists(), "database file should be created on disk");
        assert_eq!(db.db_path(), db_path.as_path());
    }

    #[tokio::test]
    async fn test_default_db_path() {
        // Headless CI runners may have no cache dir; only check the shape when one exists.
        if let Ok(path) = default_db_path() {
            assert!(path.to_string_lossy().contains("jobkeeper"));
            assert!(path.to_string_lossy().ends_with("jobkeeper.db"));
        }
    }

    #[test]
    fn test_gate_job_id() {
        assert!(gate_job_id("nope", "test").is_none());
        assert!(gate_job_id("6f1c2d3e-4a5b-6c7d-8e9f-a0b1c2d3e4f5", "test").is_some());
    }
}
