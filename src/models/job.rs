use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::Chunk;

/// Job status state machine:
///
/// ```text
/// Queued -> InProgress -> Succeeded
/// InProgress -> RetryPending     (transient error, attempts left)
/// InProgress -> DeadLettered     (permanent error, or attempts exhausted)
/// RetryPending -> InProgress     (next_attempt_at elapsed)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    InProgress,
    RetryPending,
    Succeeded,
    DeadLettered,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::DeadLettered)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Succeeded)
                | (JobStatus::InProgress, JobStatus::RetryPending)
                | (JobStatus::InProgress, JobStatus::DeadLettered)
                | (JobStatus::RetryPending, JobStatus::InProgress)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::RetryPending => "retry_pending",
            JobStatus::Succeeded => "succeeded",
            JobStatus::DeadLettered => "dead_lettered",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "in_progress" => Ok(JobStatus::InProgress),
            "retry_pending" => Ok(JobStatus::RetryPending),
            "succeeded" => Ok(JobStatus::Succeeded),
            "dead_lettered" => Ok(JobStatus::DeadLettered),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tracked unit of work that turns one chunk into one stored vector.
///
/// `attempt_count` is the number of times the job has entered `InProgress`;
/// it starts at zero while `Queued` and is bumped by each conditional
/// claim transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingJob {
    pub id: Uuid,
    pub chunk_id: Uuid,
    pub document_id: String,
    pub tenant_id: String,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub vector_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmbeddingJob {
    /// A fresh job for a newly created chunk.
    pub fn queued(chunk: &Chunk) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            chunk_id: chunk.id,
            document_id: chunk.document_id.clone(),
            tenant_id: chunk.tenant_id.clone(),
            status: JobStatus::Queued,
            attempt_count: 0,
            next_attempt_at: None,
            last_error: None,
            vector_ref: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields changed by a conditional status transition. `None` leaves the
/// column untouched, except `next_attempt_at` which is always written so
/// a retry deadline never survives into a later state.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub attempt_count: Option<u32>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub vector_ref: Option<String>,
}

impl JobUpdate {
    pub fn to_status(status: JobStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

/// Per-status job counts for one document, the aggregate the API layer reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStatusCounts {
    pub queued: u64,
    pub in_progress: u64,
    pub retry_pending: u64,
    pub succeeded: u64,
    pub dead_lettered: u64,
}

impl JobStatusCounts {
    pub fn total(&self) -> u64 {
        self.queued + self.in_progress + self.retry_pending + self.succeeded + self.dead_lettered
    }

    pub fn all_terminal(&self) -> bool {
        self.queued == 0 && self.in_progress == 0 && self.retry_pending == 0
    }

    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::InProgress => self.in_progress += 1,
            JobStatus::RetryPending => self.retry_pending += 1,
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::DeadLettered => self.dead_lettered += 1,
        }
    }
}
