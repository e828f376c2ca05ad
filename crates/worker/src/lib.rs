//! `mlq-worker`
//!
//! Workers lease jobs from the queue, run the compute function for one
//! episode, classify faults and write the resulting state back.

pub mod error;
pub mod pool;
pub mod worker;

pub use error::WorkerError;
pub use pool::{WorkerPool, WorkerPoolHandle};
pub use worker::{EpisodeOutcome, Worker, WorkerConfig};
