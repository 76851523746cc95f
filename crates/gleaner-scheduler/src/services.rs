//! External collaborators consumed by the pipeline.
//!
//! Extractor and generator report failure as an empty result; the pipeline
//! turns emptiness and timeouts into distinct failure messages.

use async_trait::async_trait;

use crate::types::{QaPair, StoredArtifact};

/// Fetches a URL and returns its plain-text segments in document order.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Empty on any retrieval or parsing error.
    async fn fetch(&self, url: &str) -> Vec<String>;
}

/// Turns text into question/answer pairs via a language model.
#[async_trait]
pub trait QaGenerator: Send + Sync {
    /// Empty on failure. May take minutes; callers apply a timeout.
    async fn generate(&self, text: &str) -> Vec<QaPair>;
}

/// Durable blob storage for generated artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes`, deriving the final name from `suggested_name` when given.
    async fn put(
        &self,
        bytes: Vec<u8>,
        suggested_name: Option<&str>,
    ) -> Result<StoredArtifact, StorageError>;

    /// Returns whether an artifact with this name existed.
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("{0}")]
    Rejected(String),
}
