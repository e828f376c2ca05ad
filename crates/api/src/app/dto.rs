use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mlq_core::Job;

use crate::app::services::ServiceError;

// -------------------------
// Request DTOs
// -------------------------

// Every field is optional so a missing parameter becomes a 400 with our own
// error body instead of axum's plain-text rejection.

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PredictQuery {
    pub dataset_id: Option<String>,
    pub model_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BlobQuery {
    pub token: Option<String>,
}

pub fn required(value: Option<String>, name: &'static str) -> Result<String, ServiceError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ServiceError::MissingParam(name))
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct JobCreatedResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub enqueued_at: Option<f64>,
    pub started_at: Option<f64>,
    pub ended_at: Option<f64>,
}

impl From<&Job> for StatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            status: job.state().as_str(),
            enqueued_at: job.enqueued_at().map(epoch_seconds),
            started_at: job.started_at().map(epoch_seconds),
            ended_at: job.ended_at().map(epoch_seconds),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub url: String,
}

/// Seconds since the Unix epoch with sub-second precision.
pub fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}
