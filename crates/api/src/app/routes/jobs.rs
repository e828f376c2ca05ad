use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::app::services::{JobService, ServiceError};
use crate::app::{dto, errors};

pub async fn upload(Extension(jobs): Extension<Arc<JobService>>) -> axum::response::Response {
    match jobs.upload() {
        Ok(ticket) => Json(dto::UploadResponse {
            id: ticket.id.to_string(),
            url: ticket.url.into_string(),
        })
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn fit(
    Extension(jobs): Extension<Arc<JobService>>,
    Query(query): Query<dto::IdQuery>,
) -> axum::response::Response {
    let submitted = dto::required(query.id, "id").and_then(|id| jobs.submit_fit(&id));
    created(submitted)
}

pub async fn predict(
    Extension(jobs): Extension<Arc<JobService>>,
    Query(query): Query<dto::PredictQuery>,
) -> axum::response::Response {
    let submitted = dto::required(query.dataset_id, "dataset_id").and_then(|dataset_id| {
        let model_id = dto::required(query.model_id, "model_id")?;
        jobs.submit_predict(&dataset_id, &model_id)
    });
    created(submitted)
}

fn created(submitted: Result<mlq_core::JobId, ServiceError>) -> axum::response::Response {
    match submitted {
        Ok(id) => (
            StatusCode::OK,
            Json(dto::JobCreatedResponse { id: id.to_string() }),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn status(
    Extension(jobs): Extension<Arc<JobService>>,
    Query(query): Query<dto::IdQuery>,
) -> axum::response::Response {
    let job = match dto::required(query.id, "id").and_then(|id| jobs.status(&id)) {
        Ok(job) => job,
        Err(e) => return errors::service_error_to_response(e),
    };
    Json(dto::StatusResponse::from(&job)).into_response()
}

pub async fn result(
    Extension(jobs): Extension<Arc<JobService>>,
    Query(query): Query<dto::IdQuery>,
) -> axum::response::Response {
    match dto::required(query.id, "id").and_then(|id| jobs.result(&id)) {
        Ok(url) => Json(dto::ResultResponse {
            url: url.into_string(),
        })
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
