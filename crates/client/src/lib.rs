//! `mlq-client`: HTTP client for the gateway: upload datasets, submit fit
//! and predict jobs, and wait for them to settle.

pub mod client;
pub mod error;
pub mod wait;

pub use client::{Client, JobStatus};
pub use error::ClientError;
pub use wait::Wait;
