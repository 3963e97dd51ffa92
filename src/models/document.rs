use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a document as seen by the status query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Chunking,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Chunking => "chunking",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(DocumentStatus::Uploaded),
            "chunking" => Ok(DocumentStatus::Chunking),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(format!("unknown document status: {other}")),
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tenant-owned document. Created by the upload API; only the pipeline
/// mutates its status, nothing here deletes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub tenant_id: String,
    pub storage_ref: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

/// Character span of a chunk inside its source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// A contiguous, bounded span of document text, the unit of embedding.
/// Immutable once created; the full set for a document is created in one
/// bulk operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: String,
    pub tenant_id: String,
    pub sequence_index: u32,
    pub text: String,
    pub span: CharSpan,
}

impl Chunk {
    /// Deterministic chunk id from tenant, document id and position.
    /// Re-chunking the same document yields the same ids, which is what makes
    /// vector re-upserts overwrite instead of duplicate. Document ids are
    /// only unique per tenant, so the tenant is part of the hashed name;
    /// otherwise two tenants sharing a document id would collide on chunk
    /// rows and vector points.
    pub fn generate_id(tenant_id: &str, document_id: &str, sequence_index: u32) -> Uuid {
        let name = format!("{tenant_id}:{document_id}:{sequence_index}");
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }

    pub fn new(
        document: &Document,
        sequence_index: u32,
        text: String,
        span: CharSpan,
    ) -> Self {
        Self {
            id: Self::generate_id(&document.tenant_id, &document.id, sequence_index),
            document_id: document.id.clone(),
            tenant_id: document.tenant_id.clone(),
            sequence_index,
            text,
            span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_deterministic() {
        let a = Chunk::generate_id("tenant-a", "doc-1", 3);
        let b = Chunk::generate_id("tenant-a", "doc-1", 3);
        let c = Chunk::generate_id("tenant-a", "doc-1", 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_chunk_id_is_tenant_scoped() {
        // Document ids are only unique per tenant; the same document id
        // under two tenants must never share chunk ids.
        let a = Chunk::generate_id("tenant-a", "doc-1", 0);
        let b = Chunk::generate_id("tenant-b", "doc-1", 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            DocumentStatus::Uploaded,
            DocumentStatus::Chunking,
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::Failed,
        ] {
            let parsed: DocumentStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("archived".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_char_span() {
        let span = CharSpan { start: 10, end: 25 };
        assert_eq!(span.len(), 15);
        assert!(!span.is_empty());
    }
}
