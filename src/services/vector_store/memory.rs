use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use super::{QueryMatch, VectorMetadata, VectorRecord, VectorStore};
use crate::error::VectorStoreError;

/// In-memory vector store used by tests and local runs. Deliberately
/// reports no batch support so the per-record fallback path stays exercised.
#[derive(Default)]
pub struct MemoryVectorStore {
    namespaces: RwLock<HashMap<String, HashMap<Uuid, (Vec<f32>, VectorMetadata)>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vectors stored in one namespace.
    pub fn namespace_len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(namespace)
            .map_or(0, HashMap::len)
    }

    pub fn metadata(&self, namespace: &str, chunk_id: Uuid) -> Option<VectorMetadata> {
        self.namespaces
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(namespace)
            .and_then(|ns| ns.get(&chunk_id))
            .map(|(_, metadata)| metadata.clone())
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_ready(&self) -> Result<(), VectorStoreError> {
        Ok(())
    }

    async fn upsert(&self, namespace: &str, record: VectorRecord) -> Result<(), VectorStoreError> {
        let mut namespaces = self
            .namespaces
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(record.chunk_id, (record.vector, record.metadata));
        Ok(())
    }

    async fn upsert_batch(
        &self,
        namespace: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), VectorStoreError> {
        for record in records {
            self.upsert(namespace, record).await?;
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: Vec<f32>,
        top_k: u64,
    ) -> Result<Vec<QueryMatch>, VectorStoreError> {
        let namespaces = self
            .namespaces
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(points) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<QueryMatch> = points
            .iter()
            .map(|(id, (stored, _))| QueryMatch {
                chunk_id: *id,
                score: Self::cosine(&vector, stored),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k as usize);
        Ok(matches)
    }

    fn supports_batch(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(chunk_id: Uuid, vector: Vec<f32>, document_id: &str) -> VectorRecord {
        VectorRecord {
            chunk_id,
            vector,
            metadata: VectorMetadata {
                document_id: document_id.to_string(),
                sequence_index: 0,
                text: "body".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_reupsert_replaces_not_duplicates() {
        let store = MemoryVectorStore::new();
        let id = Uuid::new_v4();

        store.upsert("tenant-a", record(id, vec![1.0, 0.0], "doc-1")).await.unwrap();
        store.upsert("tenant-a", record(id, vec![0.0, 1.0], "doc-1")).await.unwrap();

        assert_eq!(store.namespace_len("tenant-a"), 1);
        let hits = store.query("tenant-a", vec![0.0, 1.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let store = MemoryVectorStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        // Identical content embedded for two tenants.
        store.upsert("tenant-a", record(a, vec![1.0, 0.0], "doc-a")).await.unwrap();
        store.upsert("tenant-b", record(b, vec![1.0, 0.0], "doc-b")).await.unwrap();

        let hits = store.query("tenant-a", vec![1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, a);

        let hits = store.query("tenant-b", vec![1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, b);
    }

    #[tokio::test]
    async fn test_query_unknown_namespace_is_empty() {
        let store = MemoryVectorStore::new();
        assert!(store.query("ghost", vec![1.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_k_ordering() {
        let store = MemoryVectorStore::new();
        let close = Uuid::new_v4();
        let far = Uuid::new_v4();
        store.upsert("t", record(close, vec![1.0, 0.1], "d")).await.unwrap();
        store.upsert("t", record(far, vec![0.1, 1.0], "d")).await.unwrap();

        let hits = store.query("t", vec![1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, close);
    }
}
