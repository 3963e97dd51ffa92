use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use uuid::Uuid;

use super::{JobStore, truncate_error};
use crate::error::JobStoreError;
use crate::models::{
    CharSpan, Chunk, DeadLetterRecord, Document, DocumentStatus, EmbeddingJob, JobStatus,
    JobStatusCounts, JobStoreConfig, JobUpdate,
};

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub async fn connect(config: &JobStoreConfig) -> Result<Self, JobStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| JobStoreError::ConnectionError(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Create tables and the indexes the status queries depend on.
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                storage_ref TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (tenant_id, id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id UUID PRIMARY KEY,
                document_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                sequence_index INTEGER NOT NULL,
                body TEXT NOT NULL,
                span_start BIGINT NOT NULL,
                span_end BIGINT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS embedding_jobs (
                id UUID PRIMARY KEY,
                chunk_id UUID NOT NULL,
                document_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                next_attempt_at TIMESTAMPTZ,
                last_error TEXT,
                vector_ref TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS dead_letters (
                id BIGSERIAL PRIMARY KEY,
                job_id UUID NOT NULL,
                tenant_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                last_error TEXT NOT NULL,
                attempt_count INTEGER NOT NULL,
                dead_lettered_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS chunks_tenant_document_idx \
             ON chunks (tenant_id, document_id)",
            "CREATE INDEX IF NOT EXISTS jobs_tenant_document_idx \
             ON embedding_jobs (tenant_id, document_id)",
            "CREATE INDEX IF NOT EXISTS jobs_tenant_status_idx \
             ON embedding_jobs (tenant_id, status)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| JobStoreError::MigrationError(e.to_string()))?;
        }

        Ok(())
    }

    fn document_from_row(row: &PgRow) -> Document {
        let status: String = row.get("status");
        Document {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            storage_ref: row.get("storage_ref"),
            status: status.parse().unwrap_or(DocumentStatus::Uploaded),
            created_at: row.get("created_at"),
        }
    }

    fn job_from_row(row: &PgRow) -> EmbeddingJob {
        let status: String = row.get("status");
        let attempt_count: i32 = row.get("attempt_count");
        EmbeddingJob {
            id: row.get("id"),
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            tenant_id: row.get("tenant_id"),
            status: status.parse().unwrap_or(JobStatus::Queued),
            attempt_count: attempt_count.max(0) as u32,
            next_attempt_at: row.get("next_attempt_at"),
            last_error: row.get("last_error"),
            vector_ref: row.get("vector_ref"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn chunk_from_row(row: &PgRow) -> Chunk {
        let sequence_index: i32 = row.get("sequence_index");
        let span_start: i64 = row.get("span_start");
        let span_end: i64 = row.get("span_end");
        Chunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            tenant_id: row.get("tenant_id"),
            sequence_index: sequence_index.max(0) as u32,
            text: row.get("body"),
            span: CharSpan {
                start: span_start.max(0) as usize,
                end: span_end.max(0) as usize,
            },
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_document(&self, document: &Document) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, tenant_id, storage_ref, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, id) DO UPDATE SET
                storage_ref = EXCLUDED.storage_ref,
                status = EXCLUDED.status
            "#,
        )
        .bind(&document.id)
        .bind(&document.tenant_id)
        .bind(&document.storage_ref)
        .bind(document.status.as_str())
        .bind(document.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_document(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, JobStoreError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, storage_ref, status, created_at \
             FROM documents WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::document_from_row))
    }

    async fn update_document_status(
        &self,
        tenant_id: &str,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), JobStoreError> {
        sqlx::query("UPDATE documents SET status = $1 WHERE tenant_id = $2 AND id = $3")
            .bind(status.as_str())
            .bind(tenant_id)
            .bind(document_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn replace_document_chunks(
        &self,
        document: &Document,
        chunks: &[Chunk],
        jobs: &[EmbeddingJob],
    ) -> Result<(), JobStoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM embedding_jobs WHERE tenant_id = $1 AND document_id = $2")
            .bind(&document.tenant_id)
            .bind(&document.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM chunks WHERE tenant_id = $1 AND document_id = $2")
            .bind(&document.tenant_id)
            .bind(&document.id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, tenant_id, sequence_index, body, span_start, span_end)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.tenant_id)
            .bind(chunk.sequence_index as i32)
            .bind(&chunk.text)
            .bind(chunk.span.start as i64)
            .bind(chunk.span.end as i64)
            .execute(&mut *tx)
            .await?;
        }

        for job in jobs {
            sqlx::query(
                r#"
                INSERT INTO embedding_jobs
                    (id, chunk_id, document_id, tenant_id, status, attempt_count,
                     next_attempt_at, last_error, vector_ref, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(job.id)
            .bind(job.chunk_id)
            .bind(&job.document_id)
            .bind(&job.tenant_id)
            .bind(job.status.as_str())
            .bind(job.attempt_count as i32)
            .bind(job.next_attempt_at)
            .bind(&job.last_error)
            .bind(&job.vector_ref)
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE documents SET status = $1 WHERE tenant_id = $2 AND id = $3")
            .bind(DocumentStatus::Processing.as_str())
            .bind(&document.tenant_id)
            .bind(&document.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_job(&self, job_id: Uuid) -> Result<Option<EmbeddingJob>, JobStoreError> {
        let row = sqlx::query(
            "SELECT id, chunk_id, document_id, tenant_id, status, attempt_count, \
                    next_attempt_at, last_error, vector_ref, created_at, updated_at \
             FROM embedding_jobs WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::job_from_row))
    }

    async fn fetch_chunk(&self, chunk_id: Uuid) -> Result<Option<Chunk>, JobStoreError> {
        let row = sqlx::query(
            "SELECT id, document_id, tenant_id, sequence_index, body, span_start, span_end \
             FROM chunks WHERE id = $1",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::chunk_from_row))
    }

    async fn transition_job(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<bool, JobStoreError> {
        let last_error = update.last_error.as_deref().map(truncate_error);

        let result = sqlx::query(
            r#"
            UPDATE embedding_jobs SET
                status = $1,
                attempt_count = COALESCE($2, attempt_count),
                next_attempt_at = $3,
                last_error = COALESCE($4, last_error),
                vector_ref = COALESCE($5, vector_ref),
                updated_at = $6
            WHERE id = $7 AND status = $8
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.attempt_count.map(|c| c as i32))
        .bind(update.next_attempt_at)
        .bind(last_error)
        .bind(&update.vector_ref)
        .bind(Utc::now())
        .bind(job_id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fetch_recoverable(
        &self,
        stale_before: chrono::DateTime<Utc>,
    ) -> Result<Vec<EmbeddingJob>, JobStoreError> {
        let rows = sqlx::query(
            "SELECT id, chunk_id, document_id, tenant_id, status, attempt_count, \
                    next_attempt_at, last_error, vector_ref, created_at, updated_at \
             FROM embedding_jobs \
             WHERE status IN ($1, $2) OR (status = $3 AND updated_at < $4) \
             ORDER BY next_attempt_at NULLS FIRST",
        )
        .bind(JobStatus::RetryPending.as_str())
        .bind(JobStatus::Queued.as_str())
        .bind(JobStatus::InProgress.as_str())
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::job_from_row).collect())
    }

    async fn job_status_counts(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> Result<JobStatusCounts, JobStoreError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM embedding_jobs \
             WHERE tenant_id = $1 AND document_id = $2 GROUP BY status",
        )
        .bind(tenant_id)
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = JobStatusCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            if let Ok(status) = status.parse::<JobStatus>() {
                let count = count.max(0) as u64;
                match status {
                    JobStatus::Queued => counts.queued += count,
                    JobStatus::InProgress => counts.in_progress += count,
                    JobStatus::RetryPending => counts.retry_pending += count,
                    JobStatus::Succeeded => counts.succeeded += count,
                    JobStatus::DeadLettered => counts.dead_lettered += count,
                }
            }
        }

        Ok(counts)
    }

    async fn append_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO dead_letters
                (job_id, tenant_id, document_id, last_error, attempt_count, dead_lettered_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.job_id)
        .bind(&record.tenant_id)
        .bind(&record.document_id)
        .bind(truncate_error(&record.last_error))
        .bind(record.attempt_count as i32)
        .bind(record.dead_lettered_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
