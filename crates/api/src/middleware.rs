use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};

/// Log method, path, status and latency of every request.
pub async fn request_log(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status();
    let latency_ms = started.elapsed().as_millis() as u64;
    if status.is_server_error() {
        tracing::warn!(%method, %path, status = status.as_u16(), latency_ms, "request failed");
    } else {
        tracing::debug!(%method, %path, status = status.as_u16(), latency_ms, "request served");
    }
    response
}
