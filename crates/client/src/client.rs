use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use mlq_compute::Table;
use mlq_core::{DatasetId, JobId, JobState, elapsed_since, reference_time};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::ClientError;
use crate::wait::Wait;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct UploadBody {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct IdBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UrlBody {
    url: String,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
    enqueued_at: Option<f64>,
    started_at: Option<f64>,
    ended_at: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// A job's state as last reported by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub state: JobState,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Time since the state's reference timestamp was reached.
    pub elapsed: Duration,
}

impl JobStatus {
    fn from_body(body: StatusBody, now: DateTime<Utc>) -> Result<Self, ClientError> {
        let state: JobState = body
            .status
            .parse()
            .map_err(|e| ClientError::Decode(format!("status: {e}")))?;
        let enqueued_at = body.enqueued_at.and_then(from_epoch_seconds);
        let started_at = body.started_at.and_then(from_epoch_seconds);
        let ended_at = body.ended_at.and_then(from_epoch_seconds);
        let elapsed = elapsed_since(reference_time(state, enqueued_at, started_at, ended_at), now);
        Ok(Self {
            state,
            enqueued_at,
            started_at,
            ended_at,
            elapsed,
        })
    }
}

fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round() as i64;
    Utc.timestamp_micros(micros).single()
}

/// Client for the gateway's HTTP protocol.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl Client {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Upper bound on the pause between status calls while waiting.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Upload a dataset and return its id.
    pub async fn upload(&self, bytes: Vec<u8>) -> Result<DatasetId, ClientError> {
        let ticket: UploadBody = json(self.http.get(self.url("upload")).send().await?).await?;
        let id: DatasetId = ticket
            .id
            .parse()
            .map_err(|e| ClientError::Decode(format!("dataset id: {e}")))?;

        checked(self.http.put(&ticket.url).body(bytes).send().await?).await?;
        debug!(dataset_id = %id, "dataset uploaded");
        Ok(id)
    }

    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<DatasetId, ClientError> {
        let bytes = tokio::fs::read(path).await?;
        self.upload(bytes).await
    }

    pub async fn upload_table(&self, table: &Table) -> Result<DatasetId, ClientError> {
        let bytes = table
            .to_bytes()
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        self.upload(bytes).await
    }

    /// Submit a fit job; its id doubles as the model id.
    pub async fn fit(&self, dataset_id: &DatasetId, wait: Wait) -> Result<JobId, ClientError> {
        let request = self
            .http
            .post(self.url("fit"))
            .query(&[("id", dataset_id.to_string())]);
        let id = self.submit(request).await?;
        self.wait(id, wait).await?;
        Ok(id)
    }

    /// Submit a predict job against a model produced by [`Client::fit`].
    pub async fn predict(
        &self,
        dataset_id: &DatasetId,
        model_id: JobId,
        wait: Wait,
    ) -> Result<JobId, ClientError> {
        let request = self.http.post(self.url("predict")).query(&[
            ("dataset_id", dataset_id.to_string()),
            ("model_id", model_id.to_string()),
        ]);
        let id = self.submit(request).await?;
        self.wait(id, wait).await?;
        Ok(id)
    }

    async fn submit(&self, request: reqwest::RequestBuilder) -> Result<JobId, ClientError> {
        let body: IdBody = json(request.send().await?).await?;
        body.id
            .parse()
            .map_err(|e| ClientError::Decode(format!("job id: {e}")))
    }

    pub async fn status(&self, job_id: JobId) -> Result<JobStatus, ClientError> {
        let response = self
            .http
            .get(self.url("status"))
            .query(&[("id", job_id.to_string())])
            .send()
            .await?;
        JobStatus::from_body(json(response).await?, Utc::now())
    }

    pub async fn wait(&self, job_id: JobId, wait: Wait) -> Result<(), ClientError> {
        self.wait_with(job_id, wait, |_, _| {}).await
    }

    /// Poll until the job settles, the deadline passes or, for
    /// [`Wait::Detach`], not at all.
    ///
    /// `observer` sees the state and its elapsed time after every poll.
    pub async fn wait_with(
        &self,
        job_id: JobId,
        wait: Wait,
        mut observer: impl FnMut(JobState, Duration),
    ) -> Result<(), ClientError> {
        let started = Instant::now();
        let deadline = match wait {
            Wait::Detach => return Ok(()),
            Wait::Forever => None,
            // A deadline past what the clock can represent is no deadline.
            Wait::Within(timeout) => started.checked_add(timeout),
        };

        let mut previous = None;
        loop {
            let status = self.status(job_id).await?;
            if previous != Some(status.state) {
                info!(job_id = %job_id, state = %status.state, "job state changed");
                previous = Some(status.state);
            }
            observer(status.state, status.elapsed);

            match status.state {
                JobState::Finished => return Ok(()),
                state if state.is_terminal() => {
                    return Err(ClientError::NoResult {
                        job_id,
                        state,
                        elapsed: started.elapsed(),
                    });
                }
                _ => {}
            }

            let pause = match deadline {
                None => self.poll_interval,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ClientError::Timeout {
                            job_id,
                            waited: started.elapsed(),
                        });
                    }
                    remaining.min(self.poll_interval)
                }
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// Signed download URL of a finished job's output.
    pub async fn result_url(&self, job_id: JobId) -> Result<String, ClientError> {
        let response = self
            .http
            .get(self.url("result"))
            .query(&[("id", job_id.to_string())])
            .send()
            .await?;
        let body: UrlBody = json(response).await?;
        Ok(body.url)
    }

    pub async fn download(&self, job_id: JobId) -> Result<Vec<u8>, ClientError> {
        let url = self.result_url(job_id).await?;
        let response = checked(self.http.get(url).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn download_table(&self, job_id: JobId) -> Result<Table, ClientError> {
        let bytes = self.download(job_id).await?;
        Table::from_bytes(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Turn a non-success response into [`ClientError::Api`].
async fn checked(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or(text);
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let response = checked(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_elapsed_follows_the_reference_time() {
        let now = Utc::now();
        let secs = |ago: i64| Some(epoch(now) - ago as f64);
        let about = |d: Duration, secs: f64| (d.as_secs_f64() - secs).abs() < 0.01;

        let queued = JobStatus::from_body(
            StatusBody {
                status: "queued".into(),
                enqueued_at: secs(7),
                started_at: None,
                ended_at: None,
            },
            now,
        )
        .unwrap();
        assert_eq!(queued.state, JobState::Queued);
        assert!(about(queued.elapsed, 7.0));

        let started = JobStatus::from_body(
            StatusBody {
                status: "started".into(),
                enqueued_at: secs(7),
                started_at: secs(3),
                ended_at: None,
            },
            now,
        )
        .unwrap();
        assert!(about(started.elapsed, 3.0));

        let failed = JobStatus::from_body(
            StatusBody {
                status: "failed".into(),
                enqueued_at: secs(7),
                started_at: secs(3),
                ended_at: secs(1),
            },
            now,
        )
        .unwrap();
        assert!(about(failed.elapsed, 1.0));
    }

    #[test]
    fn unknown_status_is_a_decode_error() {
        let body = StatusBody {
            status: "exploded".into(),
            enqueued_at: None,
            started_at: None,
            ended_at: None,
        };
        assert!(matches!(
            JobStatus::from_body(body, Utc::now()),
            Err(ClientError::Decode(_))
        ));
    }

    #[test]
    fn epoch_seconds_round_trip_to_microseconds() {
        let at = Utc.timestamp_micros(1_700_000_000_123_456).unwrap();
        assert_eq!(from_epoch_seconds(epoch(at)), Some(at));
        assert_eq!(from_epoch_seconds(f64::NAN), None);
    }

    fn epoch(at: DateTime<Utc>) -> f64 {
        at.timestamp_micros() as f64 / 1_000_000.0
    }
}
