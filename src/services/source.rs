use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::SourceError;

/// Resolves a document's `storage_ref` into its raw text.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_text(&self, storage_ref: &str) -> Result<String, SourceError>;
}

/// Filesystem-backed source. `storage_ref` is a path relative to the
/// configured upload root.
pub struct FsDocumentSource {
    root: PathBuf,
}

impl FsDocumentSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn fetch_text(&self, storage_ref: &str) -> Result<String, SourceError> {
        let path = self.root.join(storage_ref);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::NotFound(storage_ref.to_string()))
            }
            Err(e) => Err(SourceError::ReadError(format!(
                "{}: {e}",
                path.display()
            ))),
        }
    }
}
