/// Inline SQL migrations for the job store schema.
///
/// Simple inline migrations rather than sqlx migration files: the schema is
/// small and self-contained. Every statement is idempotent so two processes
/// racing through first start both succeed. Each entry is its own version
/// in `_migrations`, so entries are only ever appended.

pub const MIGRATIONS: &[&str] = &[
    // 1: jobs table
    r#"
CREATE TABLE IF NOT EXISTS jobs (
    job_id          TEXT PRIMARY KEY,
    title           TEXT,
    status          TEXT NOT NULL DEFAULT 'queued',
    total_items     INTEGER NOT NULL CHECK (total_items >= 0),
    processed_items INTEGER NOT NULL DEFAULT 0,
    error           TEXT,
    created_at      INTEGER NOT NULL,
    started_at      INTEGER,
    completed_at    INTEGER,
    updated_at      INTEGER NOT NULL,
    CHECK (processed_items <= total_items)
);
"#,
    // 2-3: orphan sweep and retention lookups
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_status_updated ON jobs(status, updated_at);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_completed ON jobs(completed_at);"#,
    // 4: append-only item results
    r#"
CREATE TABLE IF NOT EXISTS job_results (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id      TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
    item_key    TEXT NOT NULL,
    outcome     TEXT NOT NULL CHECK (outcome IN ('success', 'error')),
    detail      TEXT,
    recorded_at INTEGER NOT NULL
);
"#,
    // 5: results by job, in append order
    r#"CREATE INDEX IF NOT EXISTS idx_job_results_job ON job_results(job_id, id);"#,
    // 6-7: singleton active-job pointer and its seed row
    r#"
CREATE TABLE IF NOT EXISTS active_job (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    job_id     TEXT,
    title      TEXT,
    updated_at INTEGER NOT NULL DEFAULT 0
);
"#,
    r#"INSERT OR IGNORE INTO active_job (id, job_id, title, updated_at) VALUES (1, NULL, NULL, 0);"#,
];
