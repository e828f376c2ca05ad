use std::time::Duration;

use mlq_core::{JobId, JobState};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The caller's deadline passed before the job settled. The job itself
    /// keeps running.
    #[error("timed out after {waited:?} waiting for job {job_id}")]
    Timeout { job_id: JobId, waited: Duration },

    /// The job settled without producing a result.
    #[error("stopped waiting on job {job_id} with status {state} after {elapsed:?}")]
    NoResult {
        job_id: JobId,
        state: JobState,
        elapsed: Duration,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
