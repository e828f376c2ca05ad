//! Object-store proxy: presigned URLs issued by the gateway point here when
//! blobs are held in memory.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};

use mlq_core::{BlobKey, BlobMethod, Bucket};
use mlq_infra::blob::{BlobError, InMemoryObjectStore};

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/:bucket/:key", get(get_blob).put(put_blob))
}

/// Resolve the path and check the token grants `method` on it.
fn authorize(
    blobs: &InMemoryObjectStore,
    (bucket, key): (String, String),
    token: Option<String>,
    method: BlobMethod,
) -> Result<BlobKey, BlobError> {
    let bucket: Bucket = bucket
        .parse()
        .map_err(|_| BlobError::NotFound(format!("no bucket named {bucket}")))?;
    let key = BlobKey::new(bucket, key);
    let token = token.ok_or_else(|| BlobError::Forbidden(format!("no token for {key}")))?;
    blobs.authorize(&key, method, &token)?;
    Ok(key)
}

pub async fn get_blob(
    Extension(blobs): Extension<Arc<InMemoryObjectStore>>,
    Path(path): Path<(String, String)>,
    Query(query): Query<dto::BlobQuery>,
) -> axum::response::Response {
    let read = authorize(&blobs, path, query.token, BlobMethod::Get).and_then(|key| blobs.read(&key));
    match read {
        Ok(bytes) => (StatusCode::OK, bytes).into_response(),
        Err(e) => errors::blob_error_to_response(e),
    }
}

pub async fn put_blob(
    Extension(blobs): Extension<Arc<InMemoryObjectStore>>,
    Path(path): Path<(String, String)>,
    Query(query): Query<dto::BlobQuery>,
    body: Bytes,
) -> axum::response::Response {
    let written = authorize(&blobs, path, query.token, BlobMethod::Put).and_then(|key| {
        tracing::debug!(%key, bytes = body.len(), "blob stored");
        blobs.write(key, body.to_vec())
    });
    match written {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => errors::blob_error_to_response(e),
    }
}
