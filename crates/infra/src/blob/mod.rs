//! Object store collaborator: presigned URLs and byte transfer.
//!
//! The orchestration core only needs two things from the object store:
//! - `presign(key, method, ttl)` to mint a time-limited URL ([`ObjectStore`])
//! - fetch/put bytes at such a URL ([`BlobTransport`])

use std::time::Duration;

use async_trait::async_trait;
use mlq_core::{BlobKey, BlobMethod};
use serde::{Deserialize, Serialize};

pub mod http;
pub mod memory;

pub use http::{DEFAULT_BLOB_TIMEOUT, HttpBlobTransport};
pub use memory::{InMemoryBlobTransport, InMemoryObjectStore};

/// A time-limited URL granting one method on one blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresignedUrl(String);

impl PresignedUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl core::fmt::Display for PresignedUrl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    Forbidden(String),
    #[error("blob transfer failed: {0}")]
    Transfer(String),
    #[error("invalid blob url: {0}")]
    InvalidUrl(String),
}

/// Issues presigned URLs.
pub trait ObjectStore: Send + Sync {
    fn presign(
        &self,
        key: &BlobKey,
        method: BlobMethod,
        ttl: Duration,
    ) -> Result<PresignedUrl, BlobError>;
}

/// Moves bytes to and from presigned URLs.
#[async_trait]
pub trait BlobTransport: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, BlobError>;

    async fn put(&self, url: &str, bytes: Vec<u8>) -> Result<(), BlobError>;
}
