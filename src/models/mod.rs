mod config;
mod document;
mod event;
mod job;

pub use config::{
    ChunkingConfig, Config, DEFAULT_COLLECTION, DEFAULT_EMBEDDING_URL, DEFAULT_JOB_STORE_URL,
    DEFAULT_QDRANT_URL, EmbeddingConfig, JobStoreConfig, JobStoreDriver, RetryConfig,
    VectorDriver, VectorStoreConfig, WorkerConfig,
};
pub use document::{CharSpan, Chunk, Document, DocumentStatus};
pub use event::{DeadLetterRecord, IngestionEvent, RetryDelivery};
pub use job::{EmbeddingJob, JobStatus, JobStatusCounts, JobUpdate};
