use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

pub mod blobs;
pub mod jobs;
pub mod system;

/// Largest blob accepted by the `/blobs` proxy.
pub const MAX_BLOB_BYTES: usize = 64 * 1024 * 1024;

/// Router for the job protocol and the object-store proxy.
pub fn router() -> Router {
    Router::new()
        .route("/upload", get(jobs::upload))
        .route("/fit", post(jobs::fit))
        .route("/predict", post(jobs::predict))
        .route("/status", get(jobs::status))
        .route("/result", get(jobs::result))
        .nest("/blobs", blobs::router().layer(DefaultBodyLimit::max(MAX_BLOB_BYTES)))
}
