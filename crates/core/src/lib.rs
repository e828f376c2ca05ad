//! `mlq-core`: job model, lifecycle state machine and fault policy.
//!
//! Pure domain code: no storage, transport or runtime dependencies.

pub mod blob;
pub mod error;
pub mod fault;
pub mod id;
pub mod job;

pub use blob::{BlobKey, BlobMethod, Bucket};
pub use error::{DomainError, DomainResult};
pub use fault::{Fault, FaultClass, FaultKind, FaultPolicy};
pub use id::{DatasetId, JobId};
pub use job::{
    DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_RETRIES, FaultOutcome, Job, JobKind, JobState, Transition,
    elapsed_since, reference_time,
};
