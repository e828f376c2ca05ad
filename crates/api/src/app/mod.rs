//! HTTP gateway wiring (Axum router + service wiring).
//!
//! - `services.rs`: job service and process-level queue/store/blob handles
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: query and response DTOs
//! - `errors.rs`: consistent error responses

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, JobService, ServiceError, SubmitSettings};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: &AppServices) -> Router {
    let api = routes::router()
        .layer(Extension(services.jobs.clone()))
        .layer(Extension(services.blobs.clone()));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(api)
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::request_log)))
}
