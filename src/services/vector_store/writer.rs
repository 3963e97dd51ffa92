use std::sync::Arc;

use tracing::debug;

use super::{VectorRecord, VectorStore};
use crate::error::VectorStoreError;

/// Writes chunk vectors into a tenant namespace, one bulk call per document
/// when the backend supports batching, per-chunk calls otherwise.
#[derive(Clone)]
pub struct VectorWriter {
    store: Arc<dyn VectorStore>,
}

impl VectorWriter {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub async fn write(
        &self,
        namespace: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), VectorStoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let count = records.len();
        if self.store.supports_batch() && count > 1 {
            self.store.upsert_batch(namespace, records).await?;
        } else {
            for record in records {
                self.store.upsert(namespace, record).await?;
            }
        }

        debug!(namespace, count, "vectors upserted");
        Ok(())
    }
}
