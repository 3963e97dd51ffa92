use std::sync::Arc;

use chrono::Utc;

use crate::error::JobStoreError;
use crate::models::{DeadLetterRecord, EmbeddingJob, JobStatus, JobUpdate};
use crate::services::JobStore;

/// Moves exhausted or permanently failed jobs onto the durable
/// dead-letter channel. The pipeline never reads these back; replay is
/// an operator action.
pub struct DeadLetterRouter {
    store: Arc<dyn JobStore>,
}

impl DeadLetterRouter {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Transition the job to `DeadLettered` (conditionally, from
    /// `expected`) and append its record. Returns whether the transition
    /// won; a `false` means another worker already moved the job and no
    /// record was written.
    pub async fn route(
        &self,
        job: &EmbeddingJob,
        expected: JobStatus,
        error: &str,
    ) -> Result<bool, JobStoreError> {
        let moved = self
            .store
            .transition_job(
                job.id,
                expected,
                JobUpdate {
                    status: JobStatus::DeadLettered,
                    last_error: Some(error.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        if !moved {
            return Ok(false);
        }

        self.store
            .append_dead_letter(&DeadLetterRecord {
                job_id: job.id,
                tenant_id: job.tenant_id.clone(),
                document_id: job.document_id.clone(),
                last_error: error.to_string(),
                attempt_count: job.attempt_count,
                dead_lettered_at: Utc::now(),
            })
            .await?;

        tracing::warn!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            document_id = %job.document_id,
            attempt_count = job.attempt_count,
            "job dead-lettered"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CharSpan, Chunk, Document, DocumentStatus};
    use crate::services::MemoryJobStore;

    async fn seeded_job(store: &Arc<MemoryJobStore>) -> EmbeddingJob {
        let doc = Document {
            id: "doc-1".to_string(),
            tenant_id: "tenant-a".to_string(),
            storage_ref: "doc-1.txt".to_string(),
            status: DocumentStatus::Processing,
            created_at: Utc::now(),
        };
        store.insert_document(&doc).await.unwrap();
        let chunk = Chunk::new(&doc, 0, "text".to_string(), CharSpan { start: 0, end: 4 });
        let job = EmbeddingJob::queued(&chunk);
        store
            .replace_document_chunks(&doc, &[chunk], std::slice::from_ref(&job))
            .await
            .unwrap();
        job
    }

    #[tokio::test]
    async fn test_route_writes_record_and_status() {
        let store = Arc::new(MemoryJobStore::new());
        let job = seeded_job(&store).await;
        let router = DeadLetterRouter::new(store.clone());

        let moved = router
            .route(&job, JobStatus::Queued, "model rejected input")
            .await
            .unwrap();
        assert!(moved);

        let stored = store.fetch_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::DeadLettered);
        assert_eq!(stored.last_error.as_deref(), Some("model rejected input"));

        let letters = store.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].job_id, job.id);
    }

    #[tokio::test]
    async fn test_lost_race_writes_nothing() {
        let store = Arc::new(MemoryJobStore::new());
        let job = seeded_job(&store).await;
        let router = DeadLetterRouter::new(store.clone());

        // Another worker already claimed the job.
        store
            .transition_job(job.id, JobStatus::Queued, JobUpdate::to_status(JobStatus::InProgress))
            .await
            .unwrap();

        let moved = router.route(&job, JobStatus::Queued, "boom").await.unwrap();
        assert!(!moved);
        assert!(store.dead_letters().is_empty());
    }
}
