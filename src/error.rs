//! Error types for the ingestion worker.

use thiserror::Error;

/// How a failure should be handled by the retry subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff (timeouts, rate limits, unavailability).
    Transient,
    /// Retrying can never succeed (invalid input, missing tenant, invariant breach).
    Permanent,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// Classifies an error as transient or permanent for retry decisions.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

fn message_looks_transient(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("timeout")
        || msg.contains("connection refused")
        || msg.contains("connection reset")
        || msg.contains("temporarily unavailable")
        || msg.contains("service unavailable")
        || msg.contains("too many requests")
}

/// Errors related to embedding provider calls.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding provider: {0}")]
    ConnectionError(String),

    #[error("embedding provider error (status {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding provider rejected input: {0}")]
    RejectedInput(String),

    #[error("embedding timeout")]
    Timeout,
}

impl Classify for EmbeddingError {
    fn class(&self) -> ErrorClass {
        match self {
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout => ErrorClass::Transient,
            // 429 and 5xx responses might recover (e.g. 503 Service Unavailable)
            EmbeddingError::ServerError { status, .. } => match status {
                408 | 429 | 500 | 502 | 503 | 504 => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
            EmbeddingError::RequestError(e) => {
                if e.is_timeout() || e.is_connect() {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            EmbeddingError::InvalidResponse(_) | EmbeddingError::RejectedInput(_) => {
                ErrorClass::Permanent
            }
        }
    }
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("collection error: {0}")]
    CollectionError(String),

    #[error("upsert error: {0}")]
    UpsertError(String),

    #[error("query error: {0}")]
    QueryError(String),
}

impl Classify for VectorStoreError {
    fn class(&self) -> ErrorClass {
        match self {
            VectorStoreError::ConnectionError(_) => ErrorClass::Transient,
            VectorStoreError::CollectionError(msg)
            | VectorStoreError::UpsertError(msg)
            | VectorStoreError::QueryError(msg) => {
                if message_looks_transient(msg) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
        }
    }
}

/// Errors related to the relational job store.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to connect to job store: {0}")]
    ConnectionError(String),

    #[error("migration error: {0}")]
    MigrationError(String),
}

impl Classify for JobStoreError {
    fn class(&self) -> ErrorClass {
        match self {
            JobStoreError::ConnectionError(_) => ErrorClass::Transient,
            JobStoreError::Database(e) => {
                if message_looks_transient(&e.to_string()) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            JobStoreError::MigrationError(_) => ErrorClass::Permanent,
        }
    }
}

/// Errors related to fetching document text from its storage reference.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("document content not found: {0}")]
    NotFound(String),

    #[error("failed to read document content: {0}")]
    ReadError(String),
}

impl Classify for SourceError {
    fn class(&self) -> ErrorClass {
        match self {
            SourceError::NotFound(_) => ErrorClass::Permanent,
            SourceError::ReadError(msg) => {
                if message_looks_transient(msg) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
        }
    }
}

/// Errors related to chunking.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("unknown sentence model: {0}")]
    UnknownModel(String),

    #[error("sentence model failed to build: {0}")]
    ModelError(String),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Pipeline-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("job store error: {0}")]
    JobStore(#[from] JobStoreError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("document source error: {0}")]
    Source(#[from] SourceError),

    #[error("chunking error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("broker error: {0}")]
    Broker(String),
}
