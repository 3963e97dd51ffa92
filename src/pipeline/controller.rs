//! The worker loop: consumes ingestion events, drives documents through
//! chunking and embedding, and applies retry or dead-letter handling per
//! job outcome.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Classify, ErrorClass, PipelineError};
use crate::models::{
    Chunk, DocumentStatus, EmbeddingJob, IngestionEvent, JobStatus, JobUpdate,
    RetryDelivery,
};
use crate::pipeline::broker::EventBroker;
use crate::pipeline::dead_letter::DeadLetterRouter;
use crate::pipeline::delay_queue::RetryQueue;
use crate::pipeline::retry::RetryPolicy;
use crate::services::metrics::WorkerMetrics;
use crate::services::orchestrator::{EmbedFailure, EmbedTask, EmbeddingOrchestrator};
use crate::services::vector_store::{VectorMetadata, VectorRecord, VectorWriter};
use crate::services::{Chunker, DocumentSource, JobStore};

pub struct PipelineController {
    store: Arc<dyn JobStore>,
    writer: VectorWriter,
    orchestrator: EmbeddingOrchestrator,
    chunker: Chunker,
    source: Arc<dyn DocumentSource>,
    retry_policy: RetryPolicy,
    retry_queue: Arc<RetryQueue>,
    dead_letters: DeadLetterRouter,
    metrics: Arc<WorkerMetrics>,
}

impl PipelineController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        writer: VectorWriter,
        orchestrator: EmbeddingOrchestrator,
        chunker: Chunker,
        source: Arc<dyn DocumentSource>,
        retry_policy: RetryPolicy,
        retry_queue: Arc<RetryQueue>,
    ) -> Self {
        let dead_letters = DeadLetterRouter::new(store.clone());
        Self {
            store,
            writer,
            orchestrator,
            chunker,
            source,
            retry_policy,
            retry_queue,
            dead_letters,
            metrics: Arc::new(WorkerMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<WorkerMetrics> {
        &self.metrics
    }

    /// Consume events and retry deliveries until the broker closes or a
    /// shutdown signal arrives. In-flight retry deadlines held only in the
    /// delay queue are lost on shutdown; the recovery sweep on the next
    /// start picks up everything the store still shows as unfinished.
    pub async fn run(
        &self,
        broker: Arc<dyn EventBroker>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        info!("pipeline worker started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown signal received, stopping worker");
                    break;
                }
                delivery = self.retry_queue.next_due() => {
                    self.handle_retry(delivery).await;
                }
                event = broker.next() => {
                    match event {
                        Some(event) => self.handle_event(broker.as_ref(), event).await,
                        None => {
                            info!("event stream closed, stopping worker");
                            break;
                        }
                    }
                }
            }
        }

        let stats = self.metrics.snapshot();
        info!(
            events = stats.events_processed,
            documents_completed = stats.documents_completed,
            documents_failed = stats.documents_failed,
            jobs_succeeded = stats.jobs_succeeded,
            jobs_retried = stats.jobs_retried,
            jobs_dead_lettered = stats.jobs_dead_lettered,
            "pipeline worker stopped"
        );
        Ok(())
    }

    /// Re-arm the delay queue for jobs stranded by a previous run.
    /// `RetryPending` jobs keep their stored deadline (past-due fires
    /// immediately); `Queued` and stale `InProgress` jobs are parked as
    /// `RetryPending` first so they re-enter through the normal retry
    /// claim. A lost conditional transition means another worker already
    /// owns the job.
    pub async fn recover_jobs(&self, jobs: Vec<EmbeddingJob>) {
        let now = Utc::now();
        for job in jobs {
            let delay = match job.status {
                JobStatus::RetryPending => job
                    .next_attempt_at
                    .and_then(|at| (at - now).to_std().ok())
                    .unwrap_or_default(),
                JobStatus::Queued | JobStatus::InProgress => {
                    let parked = self
                        .store
                        .transition_job(
                            job.id,
                            job.status,
                            JobUpdate {
                                status: JobStatus::RetryPending,
                                next_attempt_at: Some(now),
                                ..Default::default()
                            },
                        )
                        .await;
                    match parked {
                        Ok(true) => std::time::Duration::ZERO,
                        Ok(false) => {
                            debug!(job_id = %job.id, "job moved concurrently, not recovering");
                            continue;
                        }
                        Err(e) => {
                            warn!(job_id = %job.id, error = %e, "failed to park stranded job");
                            continue;
                        }
                    }
                }
                _ => continue,
            };
            self.retry_queue.schedule(
                RetryDelivery {
                    job_id: job.id,
                    tenant_id: job.tenant_id,
                    attempt_count: job.attempt_count,
                },
                Instant::now() + delay,
            );
        }
    }

    async fn handle_event(&self, broker: &dyn EventBroker, event: IngestionEvent) {
        self.metrics.record_event();
        let document = match self
            .store
            .fetch_document(&event.tenant_id, &event.document_id)
            .await
        {
            Ok(Some(document)) => document,
            Ok(None) => {
                warn!(
                    tenant_id = %event.tenant_id,
                    document_id = %event.document_id,
                    "event references unknown document, dropping"
                );
                self.ack(broker, &event).await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "job store unavailable, requeueing event");
                self.nack(broker, &event, true).await;
                return;
            }
        };

        if document.status == DocumentStatus::Completed {
            debug!(
                tenant_id = %document.tenant_id,
                document_id = %document.id,
                "document already completed, dropping duplicate event"
            );
            self.ack(broker, &event).await;
            return;
        }

        if let Err(e) = self
            .store
            .update_document_status(&document.tenant_id, &document.id, DocumentStatus::Chunking)
            .await
        {
            warn!(error = %e, "failed to mark document chunking, requeueing event");
            self.nack(broker, &event, true).await;
            return;
        }

        let text = match self.source.fetch_text(&document.storage_ref).await {
            Ok(text) => text,
            Err(e) if e.class() == ErrorClass::Permanent => {
                warn!(
                    tenant_id = %document.tenant_id,
                    document_id = %document.id,
                    error = %e,
                    "document content unavailable, failing document"
                );
                let _ = self
                    .store
                    .update_document_status(
                        &document.tenant_id,
                        &document.id,
                        DocumentStatus::Failed,
                    )
                    .await;
                self.ack(broker, &event).await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "transient content fetch failure, requeueing event");
                self.nack(broker, &event, true).await;
                return;
            }
        };

        let chunks = self.chunker.chunk(&document, &text);
        if chunks.is_empty() {
            info!(
                tenant_id = %document.tenant_id,
                document_id = %document.id,
                "document produced no chunks, completing"
            );
            let _ = self
                .store
                .update_document_status(
                    &document.tenant_id,
                    &document.id,
                    DocumentStatus::Completed,
                )
                .await;
            self.ack(broker, &event).await;
            return;
        }

        let jobs: Vec<EmbeddingJob> = chunks.iter().map(EmbeddingJob::queued).collect();
        if let Err(e) = self
            .store
            .replace_document_chunks(&document, &chunks, &jobs)
            .await
        {
            warn!(error = %e, "failed to persist chunk generation, requeueing event");
            self.nack(broker, &event, true).await;
            return;
        }
        info!(
            tenant_id = %document.tenant_id,
            document_id = %document.id,
            chunks = chunks.len(),
            "document chunked, jobs queued"
        );
        self.ack(broker, &event).await;

        let claimed = self.claim_queued(&jobs).await;
        let chunk_map: HashMap<Uuid, Chunk> =
            chunks.into_iter().map(|c| (c.id, c)).collect();
        let tasks: Vec<EmbedTask> = claimed
            .iter()
            .filter_map(|job| {
                chunk_map.get(&job.chunk_id).map(|chunk| EmbedTask {
                    job_id: job.id,
                    text: chunk.text.clone(),
                })
            })
            .collect();

        let outcomes = self.orchestrator.run(tasks).await;
        self.apply_outcomes(&document.tenant_id, &claimed, &chunk_map, outcomes)
            .await;
        self.finalize_document(&document.tenant_id, &document.id).await;
    }

    async fn handle_retry(&self, delivery: RetryDelivery) {
        let job = match self.store.fetch_job(delivery.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %delivery.job_id, "retry delivery for unknown job, dropping");
                return;
            }
            Err(e) => {
                warn!(job_id = %delivery.job_id, error = %e, "job store unavailable, deferring retry");
                self.retry_queue
                    .schedule(delivery, Instant::now() + std::time::Duration::from_secs(5));
                return;
            }
        };

        let attempt = job.attempt_count + 1;
        let claimed = self
            .store
            .transition_job(
                job.id,
                JobStatus::RetryPending,
                JobUpdate {
                    status: JobStatus::InProgress,
                    attempt_count: Some(attempt),
                    ..Default::default()
                },
            )
            .await;
        match claimed {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job.id, "job no longer retry-pending, dropping delivery");
                return;
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "failed to claim retry, deferring");
                self.retry_queue
                    .schedule(delivery, Instant::now() + std::time::Duration::from_secs(5));
                return;
            }
        }

        let mut job = job;
        job.status = JobStatus::InProgress;
        job.attempt_count = attempt;

        let chunk = match self.store.fetch_chunk(job.chunk_id).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                // The chunk generation was replaced while this job was parked.
                if let Ok(true) = self
                    .dead_letters
                    .route(&job, JobStatus::InProgress, "chunk row no longer exists")
                    .await
                {
                    self.metrics.record_job_dead_lettered();
                }
                self.finalize_document(&job.tenant_id, &job.document_id).await;
                return;
            }
            Err(e) => {
                self.handle_failure(
                    &job,
                    &EmbedFailure {
                        class: ErrorClass::Transient,
                        message: e.to_string(),
                    },
                )
                .await;
                return;
            }
        };

        info!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            attempt = attempt,
            "retrying embedding job"
        );
        let outcomes = self
            .orchestrator
            .run(vec![EmbedTask {
                job_id: job.id,
                text: chunk.text.clone(),
            }])
            .await;

        let mut chunk_map = HashMap::new();
        chunk_map.insert(chunk.id, chunk);
        let tenant_id = job.tenant_id.clone();
        let document_id = job.document_id.clone();
        self.apply_outcomes(&tenant_id, std::slice::from_ref(&job), &chunk_map, outcomes)
            .await;
        self.finalize_document(&tenant_id, &document_id).await;
    }

    /// Claim fresh jobs with a conditional `Queued -> InProgress` update.
    /// Jobs lost to a concurrent worker are skipped.
    async fn claim_queued(&self, jobs: &[EmbeddingJob]) -> Vec<EmbeddingJob> {
        let mut claimed = Vec::with_capacity(jobs.len());
        for job in jobs {
            let result = self
                .store
                .transition_job(
                    job.id,
                    JobStatus::Queued,
                    JobUpdate {
                        status: JobStatus::InProgress,
                        attempt_count: Some(1),
                        ..Default::default()
                    },
                )
                .await;
            match result {
                Ok(true) => {
                    let mut job = job.clone();
                    job.status = JobStatus::InProgress;
                    job.attempt_count = 1;
                    claimed.push(job);
                }
                Ok(false) => debug!(job_id = %job.id, "job already claimed, skipping"),
                Err(e) => warn!(job_id = %job.id, error = %e, "failed to claim job"),
            }
        }
        claimed
    }

    /// Persist the outcome of each in-progress job: successful vectors are
    /// written in one batch, then each winner's job row is moved to
    /// `Succeeded`; failures go through retry or dead-letter handling.
    async fn apply_outcomes(
        &self,
        tenant_id: &str,
        jobs: &[EmbeddingJob],
        chunks: &HashMap<Uuid, Chunk>,
        outcomes: Vec<crate::services::orchestrator::EmbedOutcome>,
    ) {
        let job_by_id: HashMap<Uuid, &EmbeddingJob> =
            jobs.iter().map(|job| (job.id, job)).collect();

        let mut succeeded: Vec<&EmbeddingJob> = Vec::new();
        let mut records: Vec<VectorRecord> = Vec::new();
        for outcome in outcomes {
            let Some(job) = job_by_id.get(&outcome.job_id).copied() else {
                continue;
            };
            match outcome.result {
                Ok(vector) => {
                    let Some(chunk) = chunks.get(&job.chunk_id) else {
                        if let Ok(true) = self
                            .dead_letters
                            .route(job, JobStatus::InProgress, "chunk row no longer exists")
                            .await
                        {
                            self.metrics.record_job_dead_lettered();
                        }
                        continue;
                    };
                    succeeded.push(job);
                    records.push(VectorRecord {
                        chunk_id: chunk.id,
                        vector,
                        metadata: VectorMetadata {
                            document_id: chunk.document_id.clone(),
                            sequence_index: chunk.sequence_index,
                            text: chunk.text.clone(),
                        },
                    });
                }
                Err(failure) => self.handle_failure(job, &failure).await,
            }
        }

        if records.is_empty() {
            return;
        }

        match self.writer.write(tenant_id, records).await {
            Ok(()) => {
                for job in succeeded {
                    let result = self
                        .store
                        .transition_job(
                            job.id,
                            JobStatus::InProgress,
                            JobUpdate {
                                status: JobStatus::Succeeded,
                                vector_ref: Some(job.chunk_id.to_string()),
                                ..Default::default()
                            },
                        )
                        .await;
                    match result {
                        Ok(true) => self.metrics.record_job_succeeded(),
                        Ok(false) => {}
                        Err(e) => {
                            warn!(job_id = %job.id, error = %e, "failed to mark job succeeded")
                        }
                    }
                }
            }
            Err(e) => {
                // The whole batch failed before any job row moved; every
                // affected job retries, so re-upserting the winners later is
                // safe under deterministic chunk ids.
                warn!(error = %e, "vector write failed for batch");
                let failure = EmbedFailure {
                    class: e.class(),
                    message: e.to_string(),
                };
                for job in succeeded {
                    self.handle_failure(job, &failure).await;
                }
            }
        }
    }

    /// Park a failed job for retry, or route it to the dead-letter channel
    /// when the failure is permanent or the retry budget is spent.
    async fn handle_failure(&self, job: &EmbeddingJob, failure: &EmbedFailure) {
        if failure.class == ErrorClass::Permanent || self.retry_policy.exhausted(job.attempt_count)
        {
            match self
                .dead_letters
                .route(job, JobStatus::InProgress, &failure.message)
                .await
            {
                Ok(true) => self.metrics.record_job_dead_lettered(),
                Ok(false) => {}
                Err(e) => warn!(job_id = %job.id, error = %e, "failed to dead-letter job"),
            }
            return;
        }

        let delay = self.retry_policy.next_delay(job.attempt_count);
        let next_attempt_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let parked = self
            .store
            .transition_job(
                job.id,
                JobStatus::InProgress,
                JobUpdate {
                    status: JobStatus::RetryPending,
                    next_attempt_at: Some(next_attempt_at),
                    last_error: Some(failure.message.clone()),
                    ..Default::default()
                },
            )
            .await;
        match parked {
            Ok(true) => {
                self.metrics.record_job_retried();
                self.retry_queue.schedule(
                    RetryDelivery {
                        job_id: job.id,
                        tenant_id: job.tenant_id.clone(),
                        attempt_count: job.attempt_count,
                    },
                    Instant::now() + delay,
                );
                info!(
                    job_id = %job.id,
                    attempt = job.attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure.message,
                    "retry scheduled"
                );
            }
            Ok(false) => debug!(job_id = %job.id, "job moved concurrently, not scheduling retry"),
            Err(e) => warn!(job_id = %job.id, error = %e, "failed to park job for retry"),
        }
    }

    /// Move the document to its terminal status once every job has settled.
    /// Any dead-lettered job fails the whole document.
    async fn finalize_document(&self, tenant_id: &str, document_id: &str) {
        let counts = match self.store.job_status_counts(tenant_id, document_id).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %e, "failed to read job counts");
                return;
            }
        };
        if counts.total() == 0 || !counts.all_terminal() {
            return;
        }

        let status = if counts.dead_lettered == 0 {
            DocumentStatus::Completed
        } else {
            DocumentStatus::Failed
        };
        if let Err(e) = self
            .store
            .update_document_status(tenant_id, document_id, status)
            .await
        {
            warn!(error = %e, "failed to finalize document");
            return;
        }
        self.metrics.record_document(status == DocumentStatus::Failed);
        info!(
            tenant_id = tenant_id,
            document_id = document_id,
            status = %status,
            "document finalized"
        );
    }

    async fn ack(&self, broker: &dyn EventBroker, event: &IngestionEvent) {
        if let Err(e) = broker.ack(event).await {
            warn!(error = %e, "failed to ack event");
        }
    }

    async fn nack(&self, broker: &dyn EventBroker, event: &IngestionEvent, requeue: bool) {
        if let Err(e) = broker.nack(event, requeue).await {
            warn!(error = %e, "failed to nack event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::EmbeddingError;
    use crate::models::{ChunkingConfig, Document, RetryConfig};
    use crate::pipeline::broker::ChannelBroker;
    use crate::services::embedding::EmbeddingProvider;
    use crate::services::vector_store::MemoryVectorStore;
    use crate::services::{FsDocumentSource, MemoryJobStore};

    /// Fails the first `failures` calls for texts containing `fail_on`
    /// with a transient error, succeeds otherwise.
    struct FlakyProvider {
        fail_on: String,
        failures: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FlakyProvider {
        fn new(fail_on: &str, failures: usize) -> Self {
            Self {
                fail_on: fail_on.to_string(),
                failures: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains(&self.fail_on)
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(EmbeddingError::ConnectionError(
                    "connection refused".to_string(),
                ));
            }
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    struct RejectingProvider;

    #[async_trait]
    impl EmbeddingProvider for RejectingProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::RejectedInput("token limit".to_string()))
        }
    }

    struct Harness {
        store: Arc<MemoryJobStore>,
        vectors: Arc<MemoryVectorStore>,
        queue: Arc<RetryQueue>,
        controller: PipelineController,
        broker: ChannelBroker,
        _dir: tempfile::TempDir,
    }

    fn harness(provider: Arc<dyn EmbeddingProvider>, max_attempts: u32) -> Harness {
        let store = Arc::new(MemoryJobStore::new());
        let vectors = Arc::new(MemoryVectorStore::new());
        let queue = Arc::new(RetryQueue::new());
        let dir = tempfile::tempdir().unwrap();

        let chunker = Chunker::from_config(&ChunkingConfig {
            strategy: "fixed_size".to_string(),
            window: 10,
            overlap: 0,
            sentence_model: "en".to_string(),
        })
        .unwrap();
        let controller = PipelineController::new(
            store.clone(),
            VectorWriter::new(vectors.clone()),
            EmbeddingOrchestrator::new(provider, 4, Duration::from_secs(5)),
            chunker,
            Arc::new(FsDocumentSource::new(dir.path())),
            RetryPolicy::from_config(&RetryConfig {
                max_attempts,
                base_delay_ms: 1000,
                max_delay_ms: 60_000,
            }),
            queue.clone(),
        );
        let (_publisher, broker) = ChannelBroker::channel(8);
        Harness {
            store,
            vectors,
            queue,
            controller,
            broker,
            _dir: dir,
        }
    }

    async fn seed_document(h: &Harness, id: &str, content: &str) -> IngestionEvent {
        let document = Document {
            id: id.to_string(),
            tenant_id: "tenant-a".to_string(),
            storage_ref: format!("{id}.txt"),
            status: DocumentStatus::Uploaded,
            created_at: Utc::now(),
        };
        h.store.insert_document(&document).await.unwrap();
        tokio::fs::write(h._dir.path().join(&document.storage_ref), content)
            .await
            .unwrap();
        IngestionEvent::new(id, "tenant-a")
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_then_completes() {
        // 30 chars, window 10 -> 3 chunks; the middle one fails once.
        let provider = Arc::new(FlakyProvider::new("bbb", 1));
        let h = harness(provider, 5);
        let event = seed_document(&h, "doc-1", "aaaaaaaaaabbbbbbbbbbcccccccccc").await;

        h.controller.handle_event(&h.broker, event).await;

        // Two chunks landed, the flaky one is parked for retry.
        assert_eq!(h.vectors.namespace_len("tenant-a"), 2);
        assert_eq!(h.queue.len(), 1);
        let doc = h.store.fetch_document("tenant-a", "doc-1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);

        // Paused time fast-forwards through the backoff delay.
        let delivery = h.queue.next_due().await;
        h.controller.handle_retry(delivery).await;

        assert_eq!(h.vectors.namespace_len("tenant-a"), 3);
        let doc = h.store.fetch_document("tenant-a", "doc-1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);

        let jobs = h.store.jobs_for_document("tenant-a", "doc-1");
        assert!(jobs.iter().all(|j| j.status == JobStatus::Succeeded));
        assert_eq!(jobs[1].attempt_count, 2);
        assert!(jobs[1].vector_ref.is_some());
        assert!(jobs[1].next_attempt_at.is_none());

        let stats = h.controller.metrics().snapshot();
        assert_eq!(stats.events_processed, 1);
        assert_eq!(stats.documents_completed, 1);
        assert_eq!(stats.documents_failed, 0);
        assert_eq!(stats.jobs_succeeded, 3);
        assert_eq!(stats.jobs_retried, 1);
        assert_eq!(stats.jobs_dead_lettered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_dead_letters_and_fails_document() {
        let h = harness(Arc::new(RejectingProvider), 5);
        let event = seed_document(&h, "doc-1", "aaaaaaaaaa").await;

        h.controller.handle_event(&h.broker, event).await;

        let doc = h.store.fetch_document("tenant-a", "doc-1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(h.vectors.namespace_len("tenant-a"), 0);
        assert!(h.queue.is_empty());

        let letters = h.store.dead_letters();
        assert_eq!(letters.len(), 1);
        assert!(letters[0].last_error.contains("token limit"));
        assert_eq!(letters[0].attempt_count, 1);

        let stats = h.controller.metrics().snapshot();
        assert_eq!(stats.documents_failed, 1);
        assert_eq!(stats.jobs_dead_lettered, 1);
        assert_eq!(stats.jobs_retried, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhaustion_dead_letters() {
        // Always fails transiently; two attempts allowed in total.
        let provider = Arc::new(FlakyProvider::new("aaa", usize::MAX));
        let h = harness(provider, 2);
        let event = seed_document(&h, "doc-1", "aaaaaaaaaa").await;

        h.controller.handle_event(&h.broker, event).await;
        assert_eq!(h.queue.len(), 1);

        let delivery = h.queue.next_due().await;
        h.controller.handle_retry(delivery).await;

        // Second attempt spent the budget; no further retry is scheduled.
        assert!(h.queue.is_empty());
        let letters = h.store.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempt_count, 2);
        let doc = h.store.fetch_document("tenant-a", "doc-1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_event_is_idempotent() {
        let provider = Arc::new(FlakyProvider::new("zzz", 0));
        let h = harness(provider.clone(), 5);
        let event = seed_document(&h, "doc-1", "aaaaaaaaaabbbbbbbbbb").await;

        h.controller.handle_event(&h.broker, event.clone()).await;
        let calls_after_first = provider.calls.load(Ordering::SeqCst);
        h.controller.handle_event(&h.broker, event).await;

        // Completed document short-circuits: no re-chunking, no re-embedding.
        assert_eq!(h.store.chunk_count("tenant-a", "doc-1"), 2);
        assert_eq!(h.vectors.namespace_len("tenant-a"), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_sweep_resumes_stranded_jobs() {
        // Simulates a crash after the event was acked: one job never claimed
        // (Queued), one claimed but abandoned mid-embed (InProgress).
        let provider = Arc::new(FlakyProvider::new("zzz", 0));
        let h = harness(provider, 5);
        let document = Document {
            id: "doc-1".to_string(),
            tenant_id: "tenant-a".to_string(),
            storage_ref: "doc-1.txt".to_string(),
            status: DocumentStatus::Uploaded,
            created_at: Utc::now(),
        };
        h.store.insert_document(&document).await.unwrap();

        let chunks = vec![
            Chunk::new(&document, 0, "aaaaaaaaaa".to_string(), crate::models::CharSpan { start: 0, end: 10 }),
            Chunk::new(&document, 1, "bbbbbbbbbb".to_string(), crate::models::CharSpan { start: 10, end: 20 }),
        ];
        let jobs: Vec<EmbeddingJob> = chunks.iter().map(EmbeddingJob::queued).collect();
        let abandoned_id = jobs[1].id;
        h.store
            .replace_document_chunks(&document, &chunks, &jobs)
            .await
            .unwrap();
        h.store
            .transition_job(
                abandoned_id,
                JobStatus::Queued,
                JobUpdate {
                    status: JobStatus::InProgress,
                    attempt_count: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stranded = h
            .store
            .fetch_recoverable(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(stranded.len(), 2);
        h.controller.recover_jobs(stranded).await;

        // Both re-enter through the retry path and complete.
        for _ in 0..2 {
            let delivery = h.queue.next_due().await;
            h.controller.handle_retry(delivery).await;
        }

        let doc = h.store.fetch_document("tenant-a", "doc-1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(h.vectors.namespace_len("tenant-a"), 2);

        let jobs = h.store.jobs_for_document("tenant-a", "doc-1");
        assert!(jobs.iter().all(|j| j.status == JobStatus::Succeeded));
        assert_eq!(jobs[0].attempt_count, 1);
        assert_eq!(jobs[1].attempt_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_document_event_is_dropped() {
        let h = harness(Arc::new(RejectingProvider), 5);
        let event = IngestionEvent::new("nope", "tenant-a");

        h.controller.handle_event(&h.broker, event).await;

        assert_eq!(h.vectors.namespace_len("tenant-a"), 0);
        assert!(h.store.dead_letters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_content_fails_document() {
        let h = harness(Arc::new(RejectingProvider), 5);
        let document = Document {
            id: "doc-1".to_string(),
            tenant_id: "tenant-a".to_string(),
            storage_ref: "missing.txt".to_string(),
            status: DocumentStatus::Uploaded,
            created_at: Utc::now(),
        };
        h.store.insert_document(&document).await.unwrap();

        h.controller
            .handle_event(&h.broker, IngestionEvent::new("doc-1", "tenant-a"))
            .await;

        let doc = h.store.fetch_document("tenant-a", "doc-1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_document_completes_without_jobs() {
        let h = harness(Arc::new(RejectingProvider), 5);
        let event = seed_document(&h, "doc-1", "").await;

        h.controller.handle_event(&h.broker, event).await;

        let doc = h.store.fetch_document("tenant-a", "doc-1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(h.store.chunk_count("tenant-a", "doc-1"), 0);
    }
}
