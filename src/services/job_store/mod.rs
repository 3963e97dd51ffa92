//! Relational job store: documents, chunks and embedding jobs.
//!
//! This is the durability anchor for idempotency. Chunk creation is
//! idempotent per document (prior chunks and jobs are replaced in one
//! transaction), and every job status change is a conditional single-row
//! update so concurrent workers racing on the same job id cannot
//! double-process it.

mod memory;
mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::JobStoreError;
use crate::models::{
    Chunk, DeadLetterRecord, Document, DocumentStatus, EmbeddingJob, JobStatus, JobStatusCounts,
    JobStoreConfig, JobStoreDriver, JobUpdate,
};

/// Longest error text persisted per job or dead-letter record.
pub const MAX_ERROR_LEN: usize = 500;

pub(crate) fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        message.to_string()
    } else {
        message.chars().take(MAX_ERROR_LEN).collect()
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a document row. Normally done by the upload API; here for
    /// tests and local seeding.
    async fn insert_document(&self, document: &Document) -> Result<(), JobStoreError>;

    /// Load a document scoped to its tenant. A document id belonging to a
    /// different tenant is indistinguishable from a missing one.
    async fn fetch_document(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, JobStoreError>;

    async fn update_document_status(
        &self,
        tenant_id: &str,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), JobStoreError>;

    /// Atomically drop any prior chunks and jobs for the document, insert
    /// the new generation, and mark the document `Processing`. One
    /// transaction: either the whole generation is durably queued or none
    /// of it is.
    async fn replace_document_chunks(
        &self,
        document: &Document,
        chunks: &[Chunk],
        jobs: &[EmbeddingJob],
    ) -> Result<(), JobStoreError>;

    async fn fetch_job(&self, job_id: Uuid) -> Result<Option<EmbeddingJob>, JobStoreError>;

    async fn fetch_chunk(&self, chunk_id: Uuid) -> Result<Option<Chunk>, JobStoreError>;

    /// Conditional transition: applies `update` only when the job's current
    /// status equals `expected`. Returns whether a row changed; `false`
    /// means another worker already moved the job.
    async fn transition_job(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<bool, JobStoreError>;

    /// Jobs a restarted worker must pick up again: everything parked as
    /// `RetryPending`, everything still `Queued` (crash after the event was
    /// acked but before the claim), and `InProgress` claims not touched
    /// since `stale_before` (crash mid-embed).
    async fn fetch_recoverable(
        &self,
        stale_before: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<EmbeddingJob>, JobStoreError>;

    /// Per-status job counts for one document.
    async fn job_status_counts(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> Result<JobStatusCounts, JobStoreError>;

    /// Append to the durable dead-letter channel. Never read back by the
    /// pipeline; replay is an operator action outside this worker.
    async fn append_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), JobStoreError>;
}

/// Create a job store backend based on configuration.
pub async fn create_job_store(
    config: &JobStoreConfig,
) -> Result<Arc<dyn JobStore>, JobStoreError> {
    match config.driver {
        JobStoreDriver::Postgres => {
            let store = PgJobStore::connect(config).await?;
            Ok(Arc::new(store))
        }
        JobStoreDriver::Memory => Ok(Arc::new(MemoryJobStore::new())),
    }
}
