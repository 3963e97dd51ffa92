use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use super::{QueryMatch, VectorRecord, VectorStore};
use crate::error::VectorStoreError;
use crate::models::VectorStoreConfig;

/// Qdrant backend: one collection, tenant isolation via a mandatory
/// `tenant_id` payload filter on every query.
pub struct QdrantBackend {
    client: Qdrant,
    collection: String,
    dimension: u64,
}

impl QdrantBackend {
    pub fn new(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(&config.url);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            collection: config.collection.clone(),
            dimension: config.dimension,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn to_point(namespace: &str, record: VectorRecord) -> PointStruct {
        let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
        payload.insert("tenant_id".to_string(), namespace.to_string().into());
        payload.insert("document_id".to_string(), record.metadata.document_id.into());
        payload.insert(
            "sequence_index".to_string(),
            (record.metadata.sequence_index as i64).into(),
        );
        payload.insert("text".to_string(), record.metadata.text.into());

        PointStruct::new(record.chunk_id.to_string(), record.vector, payload)
    }
}

#[async_trait]
impl VectorStore for QdrantBackend {
    async fn ensure_ready(&self) -> Result<(), VectorStoreError> {
        match self.client.collection_info(&self.collection).await {
            Ok(_) => return Ok(()),
            Err(e) => {
                let msg = e.to_string();
                if !msg.contains("not found") && !msg.contains("doesn't exist") {
                    return Err(VectorStoreError::CollectionError(msg));
                }
            }
        }

        let create_collection = CreateCollectionBuilder::new(&self.collection)
            .vectors_config(VectorParamsBuilder::new(self.dimension, Distance::Cosine));

        self.client
            .create_collection(create_collection)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        Ok(())
    }

    async fn upsert(&self, namespace: &str, record: VectorRecord) -> Result<(), VectorStoreError> {
        self.upsert_batch(namespace, vec![record]).await
    }

    async fn upsert_batch(
        &self,
        namespace: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), VectorStoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = records
            .into_iter()
            .map(|record| Self::to_point(namespace, record))
            .collect();

        let upsert = UpsertPointsBuilder::new(&self.collection, points);

        self.client
            .upsert_points(upsert)
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: Vec<f32>,
        top_k: u64,
    ) -> Result<Vec<QueryMatch>, VectorStoreError> {
        let filter = Filter::must([Condition::matches("tenant_id", namespace.to_string())]);

        let search = SearchPointsBuilder::new(&self.collection, vector, top_k)
            .filter(filter)
            .with_payload(false);

        let results = self
            .client
            .search_points(search)
            .await
            .map_err(|e| VectorStoreError::QueryError(e.to_string()))?;

        let matches = results
            .result
            .into_iter()
            .filter_map(|point| {
                let id = match point.id?.point_id_options? {
                    qdrant_client::qdrant::point_id::PointIdOptions::Uuid(uuid) => {
                        Uuid::parse_str(&uuid).ok()?
                    }
                    qdrant_client::qdrant::point_id::PointIdOptions::Num(_) => return None,
                };
                Some(QueryMatch {
                    chunk_id: id,
                    score: point.score,
                })
            })
            .collect();

        Ok(matches)
    }
}
