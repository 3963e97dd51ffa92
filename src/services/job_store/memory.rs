use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{JobStore, truncate_error};
use crate::error::JobStoreError;
use crate::models::{
    Chunk, DeadLetterRecord, Document, DocumentStatus, EmbeddingJob, JobStatus, JobStatusCounts,
    JobUpdate,
};

#[derive(Default)]
struct Inner {
    documents: HashMap<(String, String), Document>,
    chunks: HashMap<Uuid, Chunk>,
    jobs: HashMap<Uuid, EmbeddingJob>,
    dead_letters: Vec<DeadLetterRecord>,
}

/// In-memory job store with the same conditional-transition semantics as
/// the Postgres backend. Used by tests and local runs.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Chunk rows currently stored for a document.
    pub fn chunk_count(&self, tenant_id: &str, document_id: &str) -> usize {
        self.lock()
            .chunks
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.document_id == document_id)
            .count()
    }

    /// Snapshot of the dead-letter channel.
    pub fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.lock().dead_letters.clone()
    }

    /// All jobs for a document, ordered by chunk sequence.
    pub fn jobs_for_document(&self, tenant_id: &str, document_id: &str) -> Vec<EmbeddingJob> {
        let inner = self.lock();
        let mut jobs: Vec<EmbeddingJob> = inner
            .jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id && j.document_id == document_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| {
            inner
                .chunks
                .get(&j.chunk_id)
                .map(|c| c.sequence_index)
                .unwrap_or(u32::MAX)
        });
        jobs
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_document(&self, document: &Document) -> Result<(), JobStoreError> {
        self.lock().documents.insert(
            (document.tenant_id.clone(), document.id.clone()),
            document.clone(),
        );
        Ok(())
    }

    async fn fetch_document(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, JobStoreError> {
        Ok(self
            .lock()
            .documents
            .get(&(tenant_id.to_string(), document_id.to_string()))
            .cloned())
    }

    async fn update_document_status(
        &self,
        tenant_id: &str,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), JobStoreError> {
        if let Some(doc) = self
            .lock()
            .documents
            .get_mut(&(tenant_id.to_string(), document_id.to_string()))
        {
            doc.status = status;
        }
        Ok(())
    }

    async fn replace_document_chunks(
        &self,
        document: &Document,
        chunks: &[Chunk],
        jobs: &[EmbeddingJob],
    ) -> Result<(), JobStoreError> {
        let mut inner = self.lock();

        inner
            .chunks
            .retain(|_, c| !(c.tenant_id == document.tenant_id && c.document_id == document.id));
        inner
            .jobs
            .retain(|_, j| !(j.tenant_id == document.tenant_id && j.document_id == document.id));

        for chunk in chunks {
            inner.chunks.insert(chunk.id, chunk.clone());
        }
        for job in jobs {
            inner.jobs.insert(job.id, job.clone());
        }

        if let Some(doc) = inner
            .documents
            .get_mut(&(document.tenant_id.clone(), document.id.clone()))
        {
            doc.status = DocumentStatus::Processing;
        }

        Ok(())
    }

    async fn fetch_job(&self, job_id: Uuid) -> Result<Option<EmbeddingJob>, JobStoreError> {
        Ok(self.lock().jobs.get(&job_id).cloned())
    }

    async fn fetch_chunk(&self, chunk_id: Uuid) -> Result<Option<Chunk>, JobStoreError> {
        Ok(self.lock().chunks.get(&chunk_id).cloned())
    }

    async fn transition_job(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<bool, JobStoreError> {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status != expected {
            return Ok(false);
        }

        job.status = update.status;
        if let Some(attempts) = update.attempt_count {
            job.attempt_count = attempts;
        }
        job.next_attempt_at = update.next_attempt_at;
        if let Some(ref error) = update.last_error {
            job.last_error = Some(truncate_error(error));
        }
        if update.vector_ref.is_some() {
            job.vector_ref = update.vector_ref;
        }
        job.updated_at = Utc::now();

        Ok(true)
    }

    async fn fetch_recoverable(
        &self,
        stale_before: chrono::DateTime<Utc>,
    ) -> Result<Vec<EmbeddingJob>, JobStoreError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|j| match j.status {
                JobStatus::RetryPending | JobStatus::Queued => true,
                JobStatus::InProgress => j.updated_at < stale_before,
                _ => false,
            })
            .cloned()
            .collect())
    }

    async fn job_status_counts(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> Result<JobStatusCounts, JobStoreError> {
        let inner = self.lock();
        let mut counts = JobStatusCounts::default();
        for job in inner.jobs.values() {
            if job.tenant_id == tenant_id && job.document_id == document_id {
                counts.record(job.status);
            }
        }
        Ok(counts)
    }

    async fn append_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), JobStoreError> {
        let mut record = record.clone();
        record.last_error = truncate_error(&record.last_error);
        self.lock().dead_letters.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CharSpan;

    fn document(id: &str, tenant: &str) -> Document {
        Document {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            storage_ref: format!("{id}.txt"),
            status: DocumentStatus::Uploaded,
            created_at: Utc::now(),
        }
    }

    fn chunk_set(doc: &Document, n: u32) -> (Vec<Chunk>, Vec<EmbeddingJob>) {
        let chunks: Vec<Chunk> = (0..n)
            .map(|i| {
                Chunk::new(
                    doc,
                    i,
                    format!("chunk {i}"),
                    CharSpan {
                        start: (i * 10) as usize,
                        end: ((i + 1) * 10) as usize,
                    },
                )
            })
            .collect();
        let jobs = chunks.iter().map(EmbeddingJob::queued).collect();
        (chunks, jobs)
    }

    #[tokio::test]
    async fn test_replace_is_idempotent_per_document() {
        let store = MemoryJobStore::new();
        let doc = document("doc-1", "tenant-a");
        store.insert_document(&doc).await.unwrap();

        let (chunks, jobs) = chunk_set(&doc, 3);
        store.replace_document_chunks(&doc, &chunks, &jobs).await.unwrap();

        // Re-running chunk creation must not leave duplicate rows.
        let (chunks2, jobs2) = chunk_set(&doc, 3);
        store.replace_document_chunks(&doc, &chunks2, &jobs2).await.unwrap();

        assert_eq!(store.chunk_count("tenant-a", "doc-1"), 3);
        assert_eq!(
            store.job_status_counts("tenant-a", "doc-1").await.unwrap().total(),
            3
        );
    }

    #[tokio::test]
    async fn test_conditional_transition() {
        let store = MemoryJobStore::new();
        let doc = document("doc-1", "tenant-a");
        store.insert_document(&doc).await.unwrap();
        let (chunks, jobs) = chunk_set(&doc, 1);
        let job_id = jobs[0].id;
        store.replace_document_chunks(&doc, &chunks, &jobs).await.unwrap();

        let claimed = store
            .transition_job(
                job_id,
                JobStatus::Queued,
                JobUpdate {
                    status: JobStatus::InProgress,
                    attempt_count: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(claimed);

        // A second worker racing on the same claim loses.
        let claimed_again = store
            .transition_job(
                job_id,
                JobStatus::Queued,
                JobUpdate::to_status(JobStatus::InProgress),
            )
            .await
            .unwrap();
        assert!(!claimed_again);

        let job = store.fetch_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_same_document_id_across_tenants_keeps_both_chunk_sets() {
        let store = MemoryJobStore::new();
        let doc_a = document("doc-1", "tenant-a");
        let doc_b = document("doc-1", "tenant-b");
        store.insert_document(&doc_a).await.unwrap();
        store.insert_document(&doc_b).await.unwrap();

        let (chunks_a, jobs_a) = chunk_set(&doc_a, 1);
        let (chunks_b, jobs_b) = chunk_set(&doc_b, 1);
        store.replace_document_chunks(&doc_a, &chunks_a, &jobs_a).await.unwrap();
        store.replace_document_chunks(&doc_b, &chunks_b, &jobs_b).await.unwrap();

        // Chunk ids are tenant-scoped, so tenant B's write must not touch
        // tenant A's rows.
        assert_ne!(chunks_a[0].id, chunks_b[0].id);
        assert_eq!(store.chunk_count("tenant-a", "doc-1"), 1);
        assert_eq!(store.chunk_count("tenant-b", "doc-1"), 1);
        let stored_a = store.fetch_chunk(chunks_a[0].id).await.unwrap().unwrap();
        assert_eq!(stored_a.tenant_id, "tenant-a");
    }

    #[tokio::test]
    async fn test_tenant_scoped_document_fetch() {
        let store = MemoryJobStore::new();
        store.insert_document(&document("doc-1", "tenant-a")).await.unwrap();

        assert!(store.fetch_document("tenant-a", "doc-1").await.unwrap().is_some());
        // Same document id through another tenant is invisible.
        assert!(store.fetch_document("tenant-b", "doc-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dead_letter_error_truncated() {
        let store = MemoryJobStore::new();
        let record = DeadLetterRecord {
            job_id: Uuid::new_v4(),
            tenant_id: "tenant-a".to_string(),
            document_id: "doc-1".to_string(),
            last_error: "e".repeat(2000),
            attempt_count: 5,
            dead_lettered_at: Utc::now(),
        };
        store.append_dead_letter(&record).await.unwrap();
        assert_eq!(store.dead_letters()[0].last_error.len(), super::super::MAX_ERROR_LEN);
    }
}
