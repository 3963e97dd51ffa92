use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound broker event published by the upload API when a document is
/// ready for processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionEvent {
    pub document_id: String,
    pub tenant_id: String,
    pub enqueued_at: DateTime<Utc>,
}

impl IngestionEvent {
    pub fn new(document_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            tenant_id: tenant_id.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Re-delivery of a failed job, emitted by the delay queue no earlier than
/// the job's `next_attempt_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDelivery {
    pub job_id: Uuid,
    pub tenant_id: String,
    pub attempt_count: u32,
}

/// Append-only record of a job that exhausted its retry budget or failed
/// permanently. Requeueing is an operator action outside this worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub job_id: Uuid,
    pub tenant_id: String,
    pub document_id: String,
    pub last_error: String,
    pub attempt_count: u32,
    pub dead_lettered_at: DateTime<Utc>,
}
