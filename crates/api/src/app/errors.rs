use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use mlq_infra::blob::BlobError;

use crate::app::services::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::NotFound(id) => {
            json_error(StatusCode::BAD_REQUEST, "not_found", format!("no job with id {id}"))
        }
        ServiceError::InvalidState { id, state } => json_error(
            StatusCode::BAD_REQUEST,
            "invalid_state",
            format!("job {id} is {state}"),
        ),
        ServiceError::MissingParam(name) => json_error(
            StatusCode::BAD_REQUEST,
            "missing_param",
            format!("missing required parameter `{name}`"),
        ),
        ServiceError::InvalidParam { name, reason } => json_error(
            StatusCode::BAD_REQUEST,
            "invalid_param",
            format!("invalid `{name}`: {reason}"),
        ),
        other => internal_error(other),
    }
}

/// Errors of the `/blobs` proxy routes.
pub fn blob_error_to_response(err: BlobError) -> axum::response::Response {
    match err {
        BlobError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        BlobError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
        BlobError::InvalidUrl(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_url", msg),
        other => internal_error(other),
    }
}

/// Log the cause and answer with a generic 500.
pub fn internal_error(err: impl std::fmt::Display) -> axum::response::Response {
    tracing::error!(error = %err, "request failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
