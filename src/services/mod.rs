pub mod chunker;
pub mod embedding;
pub mod job_store;
pub mod metrics;
pub mod orchestrator;
pub mod source;
pub mod vector_store;

pub use chunker::Chunker;
pub use embedding::{EmbeddingProvider, HttpEmbeddingProvider};
pub use job_store::{JobStore, MemoryJobStore, PgJobStore, create_job_store};
pub use metrics::{MetricsSnapshot, WorkerMetrics};
pub use orchestrator::{EmbedOutcome, EmbedTask, EmbeddingOrchestrator};
pub use source::{DocumentSource, FsDocumentSource};
pub use vector_store::{VectorStore, VectorWriter, create_backend};
