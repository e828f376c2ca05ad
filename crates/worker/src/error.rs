use mlq_infra::jobs::{JobStoreError, QueueError};

/// Infrastructure failures that abort an episode without a state write.
///
/// The lease is left to expire, so the job is redelivered.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}
