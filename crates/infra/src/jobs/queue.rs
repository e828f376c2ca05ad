//! Job queue: named FIFO of job ids with exclusive, expiring leases.
//!
//! ## Delivery
//!
//! - `try_dequeue` is the single point of mutual exclusion: a job id is handed
//!   to at most one worker at a time.
//! - A lease that is not heartbeated within the lease window expires; the id
//!   goes back to the front of the ready list and is redelivered to the next
//!   caller (at-least-once).
//! - `ack` ends the lease for good, `release` puts the id back for a retry
//!   episode.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use mlq_core::JobId;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default lease window.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(60);

/// Opaque proof of lease ownership.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(Uuid);

impl LeaseToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseToken {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Exclusive right of one worker to run the current episode of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub job_id: JobId,
    pub token: LeaseToken,
    pub worker: String,
    /// How many times this id has been handed out since it was first enqueued.
    pub deliveries: u32,
}

/// Queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("lease on job {0} is no longer held")]
    LeaseLost(JobId),
    #[error("queue storage error: {0}")]
    Storage(String),
}

/// Durable queue of job ids with competing consumers.
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Add a job id. Returns `false` when the id is already queued or leased.
    fn enqueue(&self, id: JobId) -> Result<bool, QueueError>;

    /// Lease the next ready job, if any. Expired leases are reclaimed first.
    fn try_dequeue(&self, worker: &str) -> Result<Option<Lease>, QueueError>;

    /// Extend the lease deadline.
    fn heartbeat(&self, lease: &Lease) -> Result<(), QueueError>;

    /// The episode reached a terminal state; forget the job.
    fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Drop the lease and put the job back for another episode.
    fn release(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Drop a queued (not leased) id. Returns whether it was present.
    fn remove(&self, id: JobId) -> Result<bool, QueueError>;

    /// Number of ready (not leased) ids.
    fn len(&self) -> Result<usize, QueueError>;
}

/// Block until a job can be leased, polling every `poll_interval`.
pub async fn dequeue(
    queue: &dyn JobQueue,
    worker: &str,
    poll_interval: Duration,
) -> Result<Lease, QueueError> {
    loop {
        if let Some(lease) = queue.try_dequeue(worker)? {
            return Ok(lease);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[derive(Debug)]
struct LeaseRecord {
    token: LeaseToken,
    worker: String,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<JobId>,
    leased: HashMap<JobId, LeaseRecord>,
    deliveries: HashMap<JobId, u32>,
}

impl QueueState {
    fn contains(&self, id: JobId) -> bool {
        self.leased.contains_key(&id) || self.ready.contains(&id)
    }

    fn reap_expired(&mut self, now: Instant) {
        let expired: Vec<JobId> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(lease) = self.leased.remove(&id) {
                warn!(job_id = %id, worker = %lease.worker, "lease expired; redelivering job");
            }
            self.ready.push_front(id);
        }
    }

    fn holds(&self, lease: &Lease) -> bool {
        self.leased
            .get(&lease.job_id)
            .is_some_and(|held| held.token == lease.token)
    }
}

/// In-memory queue for tests and single-process deployments.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    name: String,
    lease_timeout: Duration,
    state: Mutex<QueueState>,
}

impl InMemoryJobQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_lease_timeout(name, DEFAULT_LEASE_TIMEOUT)
    }

    pub fn with_lease_timeout(name: impl Into<String>, lease_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            lease_timeout,
            state: Mutex::new(QueueState::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Storage("queue lock poisoned".to_string()))
    }
}

impl JobQueue for InMemoryJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn enqueue(&self, id: JobId) -> Result<bool, QueueError> {
        let mut state = self.lock()?;
        if state.contains(id) {
            debug!(queue = %self.name, job_id = %id, "duplicate enqueue ignored");
            return Ok(false);
        }
        state.ready.push_back(id);
        Ok(true)
    }

    fn try_dequeue(&self, worker: &str) -> Result<Option<Lease>, QueueError> {
        let mut state = self.lock()?;
        let now = Instant::now();
        state.reap_expired(now);

        let Some(job_id) = state.ready.pop_front() else {
            return Ok(None);
        };

        let token = LeaseToken::new();
        state.leased.insert(
            job_id,
            LeaseRecord {
                token,
                worker: worker.to_string(),
                deadline: now + self.lease_timeout,
            },
        );
        let deliveries = state.deliveries.entry(job_id).or_insert(0);
        *deliveries += 1;

        Ok(Some(Lease {
            job_id,
            token,
            worker: worker.to_string(),
            deliveries: *deliveries,
        }))
    }

    fn heartbeat(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let deadline = Instant::now() + self.lease_timeout;
        match state.leased.get_mut(&lease.job_id) {
            Some(held) if held.token == lease.token => {
                held.deadline = deadline;
                Ok(())
            }
            _ => Err(QueueError::LeaseLost(lease.job_id)),
        }
    }

    fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if !state.holds(lease) {
            return Err(QueueError::LeaseLost(lease.job_id));
        }
        state.leased.remove(&lease.job_id);
        state.deliveries.remove(&lease.job_id);
        Ok(())
    }

    fn release(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if !state.holds(lease) {
            return Err(QueueError::LeaseLost(lease.job_id));
        }
        state.leased.remove(&lease.job_id);
        state.ready.push_back(lease.job_id);
        Ok(())
    }

    fn remove(&self, id: JobId) -> Result<bool, QueueError> {
        let mut state = self.lock()?;
        let before = state.ready.len();
        state.ready.retain(|queued| *queued != id);
        let removed = state.ready.len() != before;
        if removed {
            state.deliveries.remove(&id);
        }
        Ok(removed)
    }

    fn len(&self) -> Result<usize, QueueError> {
        Ok(self.lock()?.ready.len())
    }
}
