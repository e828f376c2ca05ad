//! `mlq-compute`
//!
//! **Responsibility:** the compute boundary workers call into.
//!
//! This crate knows nothing about queues, leases or job records:
//! - It turns input blobs into an output blob for one job kind.
//! - Failures come back as a tagged [`Fault`](mlq_core::Fault); retry policy
//!   is the worker's call.

pub mod compute;
pub mod error;
pub mod faults;
pub mod model;
pub mod table;

pub use compute::{Compute, NearestCentroidCompute};
pub use error::ComputeError;
pub use faults::FaultInjector;
pub use model::NearestCentroid;
pub use table::{Column, Table, TARGET_COLUMN};
