//! Job queue and job status store.
//!
//! ## Components
//!
//! - `JobQueue`: named FIFO of job ids with exclusive, expiring leases
//! - `JobStore`: durable job records, mutated through atomic `modify`
//! - In-memory backends for tests and single-process deployments
//! - Redis backends behind the `redis` feature

pub mod queue;
#[cfg(feature = "redis")]
pub mod redis_backend;
pub mod store;

pub use queue::{
    DEFAULT_LEASE_TIMEOUT, InMemoryJobQueue, JobQueue, Lease, LeaseToken, QueueError, dequeue,
};
#[cfg(feature = "redis")]
pub use redis_backend::{RedisJobQueue, RedisJobStore};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
