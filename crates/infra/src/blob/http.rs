//! reqwest-backed blob transport for presigned HTTP URLs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{BlobError, BlobTransport};

/// Default whole-request budget of one transfer.
pub const DEFAULT_BLOB_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpBlobTransport {
    client: reqwest::Client,
}

impl HttpBlobTransport {
    pub fn new() -> Result<Self, BlobError> {
        Self::with_timeout(DEFAULT_BLOB_TIMEOUT)
    }

    /// A stalled transfer fails with [`BlobError::Transfer`] after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, BlobError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BlobError::Transfer(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

fn check(url: &str, status: StatusCode) -> Result<(), BlobError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND => Err(BlobError::NotFound(url.to_string())),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            Err(BlobError::Forbidden(url.to_string()))
        }
        other => Err(BlobError::Transfer(format!("{url}: HTTP {other}"))),
    }
}

fn transfer(e: reqwest::Error) -> BlobError {
    if e.is_builder() {
        BlobError::InvalidUrl(e.to_string())
    } else if e.is_timeout() {
        BlobError::Transfer(format!("timed out: {e}"))
    } else {
        BlobError::Transfer(e.to_string())
    }
}

#[async_trait]
impl BlobTransport for HttpBlobTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, BlobError> {
        let response = self.client.get(url).send().await.map_err(transfer)?;
        check(url, response.status())?;
        let bytes = response.bytes().await.map_err(transfer)?;
        Ok(bytes.to_vec())
    }

    async fn put(&self, url: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        let response = self
            .client
            .put(url)
            .body(bytes)
            .send()
            .await
            .map_err(transfer)?;
        check(url, response.status())
    }
}
