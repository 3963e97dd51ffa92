//! Vector store abstraction layer.
//!
//! A trait over vector index backends (Qdrant, in-memory) so the pipeline
//! can swap backends by configuration. Every operation is scoped to a
//! namespace, and the namespace is always a tenant id: nothing written for
//! one tenant is ever visible through another tenant's namespace.

mod memory;
mod qdrant;
mod writer;

pub use memory::MemoryVectorStore;
pub use qdrant::QdrantBackend;
pub use writer::VectorWriter;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::VectorStoreError;
use crate::models::{VectorDriver, VectorStoreConfig};

/// One vector plus the metadata stored alongside it.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub chunk_id: Uuid,
    pub vector: Vec<f32>,
    pub metadata: VectorMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMetadata {
    pub document_id: String,
    pub sequence_index: u32,
    pub text: String,
}

/// A similarity search hit.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub chunk_id: Uuid,
    pub score: f32,
}

/// Abstract vector index. Upserts are keyed by chunk id within a namespace;
/// re-upserting the same key replaces the prior entry, which is what makes
/// retried jobs idempotent at the storage layer.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the underlying collection/index if missing.
    async fn ensure_ready(&self) -> Result<(), VectorStoreError>;

    /// Upsert a single record into the tenant namespace.
    async fn upsert(&self, namespace: &str, record: VectorRecord) -> Result<(), VectorStoreError>;

    /// Upsert many records in one call. Backends that cannot batch report
    /// `supports_batch() == false` and callers fall back to per-record
    /// upserts; both paths are observably equivalent.
    async fn upsert_batch(
        &self,
        namespace: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), VectorStoreError>;

    /// Top-k similarity search within one tenant namespace.
    async fn query(
        &self,
        namespace: &str,
        vector: Vec<f32>,
        top_k: u64,
    ) -> Result<Vec<QueryMatch>, VectorStoreError>;

    fn supports_batch(&self) -> bool {
        true
    }
}

/// Create a vector store backend based on configuration.
pub async fn create_backend(
    config: &VectorStoreConfig,
) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    match config.driver {
        VectorDriver::Qdrant => {
            let backend = QdrantBackend::new(config)?;
            Ok(Arc::new(backend))
        }
        VectorDriver::Memory => Ok(Arc::new(MemoryVectorStore::new())),
    }
}
