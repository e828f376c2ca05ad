//! In-memory object store with token-based presigned URLs.
//!
//! URLs look like `{base_url}/blobs/{bucket}/{key}?token={token}`. The gateway
//! serves that path (see the `/blobs` routes of `mlq-api`) by calling
//! [`InMemoryObjectStore::authorize`] and then `read`/`write`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mlq_core::{BlobKey, BlobMethod, Bucket};
use reqwest::Url;
use uuid::Uuid;

use super::{BlobError, BlobTransport, ObjectStore, PresignedUrl};

#[derive(Debug, Clone)]
struct Grant {
    key: BlobKey,
    method: BlobMethod,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct InMemoryObjectStore {
    base_url: String,
    blobs: RwLock<HashMap<BlobKey, Vec<u8>>>,
    grants: RwLock<HashMap<String, Grant>>,
}

fn poisoned() -> BlobError {
    BlobError::Transfer("object store lock poisoned".to_string())
}

impl InMemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            blobs: RwLock::new(HashMap::new()),
            grants: RwLock::new(HashMap::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that `token` grants `method` on `key` right now.
    pub fn authorize(
        &self,
        key: &BlobKey,
        method: BlobMethod,
        token: &str,
    ) -> Result<(), BlobError> {
        let grants = self.grants.read().map_err(|_| poisoned())?;
        let grant = grants
            .get(token)
            .ok_or_else(|| BlobError::Forbidden(format!("unknown token for {key}")))?;

        if grant.key != *key || grant.method != method {
            return Err(BlobError::Forbidden(format!(
                "token does not grant {} on {key}",
                method.as_str()
            )));
        }
        if grant.expires_at <= Utc::now() {
            return Err(BlobError::Forbidden(format!("token for {key} expired")));
        }
        Ok(())
    }

    pub fn read(&self, key: &BlobKey) -> Result<Vec<u8>, BlobError> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    pub fn write(&self, key: BlobKey, bytes: Vec<u8>) -> Result<(), BlobError> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        blobs.insert(key, bytes);
        Ok(())
    }

    pub fn contains(&self, key: &BlobKey) -> bool {
        self.blobs
            .read()
            .map(|blobs| blobs.contains_key(key))
            .unwrap_or(false)
    }

    /// Split a presigned URL into the blob it addresses and its token.
    pub fn resolve(&self, url: &str) -> Result<(BlobKey, String), BlobError> {
        let parsed = Url::parse(url).map_err(|e| BlobError::InvalidUrl(format!("{url}: {e}")))?;
        let invalid = || BlobError::InvalidUrl(url.to_string());

        let segments: Vec<&str> = parsed.path_segments().ok_or_else(invalid)?.collect();
        let [.., "blobs", bucket, key] = segments.as_slice() else {
            return Err(invalid());
        };
        let bucket: Bucket = bucket.parse().map_err(|_| invalid())?;

        let token = parsed
            .query_pairs()
            .find(|(name, _)| name == "token")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(invalid)?;

        Ok((BlobKey::new(bucket, *key), token))
    }

    /// Authorized GET through a presigned URL.
    pub fn get_signed(&self, url: &str) -> Result<Vec<u8>, BlobError> {
        let (key, token) = self.resolve(url)?;
        self.authorize(&key, BlobMethod::Get, &token)?;
        self.read(&key)
    }

    /// Authorized PUT through a presigned URL.
    pub fn put_signed(&self, url: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        let (key, token) = self.resolve(url)?;
        self.authorize(&key, BlobMethod::Put, &token)?;
        self.write(key, bytes)
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn presign(
        &self,
        key: &BlobKey,
        method: BlobMethod,
        ttl: Duration,
    ) -> Result<PresignedUrl, BlobError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| BlobError::InvalidUrl(format!("presign ttl out of range: {e}")))?;
        let now = Utc::now();
        let token = Uuid::new_v4().simple().to_string();

        let mut grants = self.grants.write().map_err(|_| poisoned())?;
        grants.retain(|_, grant| grant.expires_at > now);
        grants.insert(
            token.clone(),
            Grant {
                key: key.clone(),
                method,
                expires_at: now + ttl,
            },
        );

        Ok(PresignedUrl::new(format!(
            "{}/blobs/{}/{}?token={token}",
            self.base_url, key.bucket, key.key
        )))
    }
}

/// Transport that short-circuits presigned URLs straight into an
/// [`InMemoryObjectStore`], for tests that run without HTTP.
#[derive(Debug, Clone)]
pub struct InMemoryBlobTransport {
    store: Arc<InMemoryObjectStore>,
}

impl InMemoryBlobTransport {
    pub fn new(store: Arc<InMemoryObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BlobTransport for InMemoryBlobTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, BlobError> {
        self.store.get_signed(url)
    }

    async fn put(&self, url: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        self.store.put_signed(url, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn store() -> InMemoryObjectStore {
        InMemoryObjectStore::new("http://localhost:8080/")
    }

    #[test]
    fn presigned_url_layout() {
        let store = store();
        let key = BlobKey::new(Bucket::Datasets, "abc");
        let url = store.presign(&key, BlobMethod::Put, HOUR).unwrap();

        assert!(url
            .as_str()
            .starts_with("http://localhost:8080/blobs/datasets/abc?token="));
        let (resolved, _) = store.resolve(url.as_str()).unwrap();
        assert_eq!(resolved, key);
    }

    #[test]
    fn put_then_get_through_presigned_urls() {
        let store = store();
        let key = BlobKey::new(Bucket::Results, "r1");

        let put = store.presign(&key, BlobMethod::Put, HOUR).unwrap();
        store.put_signed(put.as_str(), b"payload".to_vec()).unwrap();

        let get = store.presign(&key, BlobMethod::Get, HOUR).unwrap();
        assert_eq!(store.get_signed(get.as_str()).unwrap(), b"payload".to_vec());
    }

    #[test]
    fn token_is_bound_to_method_and_key() {
        let store = store();
        let key = BlobKey::new(Bucket::Models, "m1");
        store.write(key.clone(), b"model".to_vec()).unwrap();

        let put = store.presign(&key, BlobMethod::Put, HOUR).unwrap();
        assert!(matches!(store.get_signed(put.as_str()), Err(BlobError::Forbidden(_))));

        let (_, token) = store.resolve(put.as_str()).unwrap();
        let other = BlobKey::new(Bucket::Models, "m2");
        assert!(matches!(
            store.authorize(&other, BlobMethod::Put, &token),
            Err(BlobError::Forbidden(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let store = store();
        let key = BlobKey::new(Bucket::Datasets, "d1");
        let url = store.presign(&key, BlobMethod::Put, Duration::ZERO).unwrap();

        assert!(matches!(
            store.put_signed(url.as_str(), vec![1]),
            Err(BlobError::Forbidden(_))
        ));
        assert!(!store.contains(&key));
    }

    #[test]
    fn missing_blob_is_not_found() {
        let store = store();
        let key = BlobKey::new(Bucket::Results, "nope");
        let url = store.presign(&key, BlobMethod::Get, HOUR).unwrap();
        assert!(matches!(store.get_signed(url.as_str()), Err(BlobError::NotFound(_))));
    }

    #[test]
    fn malformed_urls_are_rejected() {
        let store = store();
        for url in [
            "not a url",
            "http://localhost/other/datasets/a?token=t",
            "http://localhost/blobs/unknown/a?token=t",
            "http://localhost/blobs/datasets/a",
        ] {
            assert!(
                matches!(store.resolve(url), Err(BlobError::InvalidUrl(_))),
                "{url}"
            );
        }
    }

    #[tokio::test]
    async fn transport_round_trips_bytes() {
        let store = Arc::new(store());
        let transport = InMemoryBlobTransport::new(store.clone());
        let key = BlobKey::new(Bucket::Datasets, "t1");

        let put = store.presign(&key, BlobMethod::Put, HOUR).unwrap();
        transport.put(put.as_str(), b"bytes".to_vec()).await.unwrap();

        let get = store.presign(&key, BlobMethod::Get, HOUR).unwrap();
        assert_eq!(transport.fetch(get.as_str()).await.unwrap(), b"bytes".to_vec());
    }
}
