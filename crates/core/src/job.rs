// crates/core/src/job.rs
//! Job domain types shared by the store, the manager and the HTTP layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{InvalidJobId, UnknownVariant};

/// Validated job identifier.
///
/// Parsing is the UUID gate: every store, manager and pointer entry point
/// takes the raw string and goes through [`JobId::parse`] before touching
/// storage. Only the canonical 36-character hyphenated form is accepted, and
/// the stored key is always lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random (v4) id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(input: &str) -> Result<Self, InvalidJobId> {
        if input.len() != 36 {
            return Err(InvalidJobId::new(input));
        }
        Uuid::try_parse(input)
            .map(Self)
            .map_err(|_| InvalidJobId::new(input))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for JobId {
    type Err = InvalidJobId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = InvalidJobId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.to_string()
    }
}

/// Lifecycle status of a job.
///
/// `queued → processing → {completed | failed | cancelled}`. A queued job may
/// also go straight to `cancelled` or `failed` (cancelled before start, or
/// orphaned by a dead process). Terminal states accept no further transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../web/src/types/generated/")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Processing) => true,
            (Self::Queued, Self::Failed | Self::Cancelled) => true,
            (Self::Processing, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// Statuses from which `next` may be entered. Used to build guarded
    /// `UPDATE ... WHERE status IN (...)` statements.
    pub fn predecessors(next: JobStatus) -> &'static [JobStatus] {
        match next {
            Self::Queued => &[],
            Self::Processing => &[Self::Queued],
            Self::Completed => &[Self::Processing],
            Self::Failed | Self::Cancelled => &[Self::Queued, Self::Processing],
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownVariant {
                kind: "job status",
                value: other.to_string(),
            }),
        }
    }
}

/// Outcome of a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../web/src/types/generated/")]
#[serde(rename_all = "lowercase")]
pub enum ItemOutcome {
    Success,
    Error,
}

impl ItemOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl FromStr for ItemOutcome {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(UnknownVariant {
                kind: "item outcome",
                value: other.to_string(),
            }),
        }
    }
}

/// Recorded outcome of one item. Append-only: never mutated after write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../web/src/types/generated/")]
pub struct ItemResult {
    pub item_key: String,
    pub outcome: ItemOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Unix seconds at which the item finished.
    #[ts(type = "number")]
    pub timestamp: i64,
}

impl ItemResult {
    pub fn success(item_key: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            item_key: item_key.into(),
            outcome: ItemOutcome::Success,
            detail,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn error(item_key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            item_key: item_key.into(),
            outcome: ItemOutcome::Error,
            detail: Some(detail.into()),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ItemOutcome::Success
    }
}

/// Full persisted job row including its results (completion order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub job_id: JobId,
    pub title: Option<String>,
    pub status: JobStatus,
    pub total_items: u64,
    pub processed_items: u64,
    pub results: Vec<ItemResult>,
    /// Raw server-side error text. Stays on the server.
    pub error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

impl Job {
    pub fn success_count(&self) -> u64 {
        self.results.iter().filter(|r| r.is_success()).count() as u64
    }

    pub fn error_count(&self) -> u64 {
        self.results.len() as u64 - self.success_count()
    }
}

/// Counters for a job without its result list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub job_id: JobId,
    pub title: Option<String>,
    pub status: JobStatus,
    pub total_items: u64,
    pub processed_items: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl JobSummary {
    /// Completion percentage, 0.0..=100.0. An empty job reports 100 once terminal.
    pub fn percentage(&self) -> f64 {
        if self.total_items == 0 {
            return if self.status.is_terminal() { 100.0 } else { 0.0 };
        }
        let pct = self.processed_items as f64 * 100.0 / self.total_items as f64;
        (pct * 10.0).round() / 10.0
    }
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id,
            title: job.title.clone(),
            status: job.status,
            total_items: job.total_items,
            processed_items: job.processed_items,
            success_count: job.success_count(),
            error_count: job.error_count(),
            error: job.error.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// The singleton record naming which job a UI should display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveJob {
    pub job_id: Option<JobId>,
    pub title: Option<String>,
    pub updated_at: i64,
}

impl ActiveJob {
    pub fn is_set(&self) -> bool {
        self.job_id.is_some()
    }
}
