//! Job status store: durable job records keyed by id.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use mlq_core::{DomainError, DomainResult, Job, JobId, JobState};

/// Job record persistence.
///
/// Writes go through [`JobStore::modify`], which evaluates the caller's
/// transition against the *current* record and persists the result only when
/// the transition is accepted. That keeps the state machine authoritative even
/// when an operator cancel races with the lease-holding worker.
pub trait JobStore: Send + Sync {
    /// Insert a new record. Returns `false` (and changes nothing) when a record
    /// with the same id already exists.
    fn insert(&self, job: Job) -> Result<bool, JobStoreError>;

    /// Get a job by id.
    fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Atomically read, transform and write one record.
    fn modify(
        &self,
        id: JobId,
        f: &mut dyn FnMut(&mut Job) -> DomainResult<()>,
    ) -> Result<Job, JobStoreError>;

    /// Count records per state.
    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error(transparent)]
    Transition(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub queued: usize,
    pub started: usize,
    pub finished: usize,
    pub failed: usize,
    pub stopped: usize,
    pub canceled: usize,
}

impl JobStats {
    pub fn record(&mut self, state: JobState) {
        match state {
            JobState::Queued => self.queued += 1,
            JobState::Started => self.started += 1,
            JobState::Finished => self.finished += 1,
            JobState::Failed => self.failed += 1,
            JobState::Stopped => self.stopped += 1,
            JobState::Canceled => self.canceled += 1,
        }
    }
}

/// In-memory job store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned() -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".to_string())
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) -> Result<bool, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        if jobs.contains_key(&job.id()) {
            return Ok(false);
        }
        jobs.insert(job.id(), job);
        Ok(true)
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&id).cloned())
    }

    fn modify(
        &self,
        id: JobId,
        f: &mut dyn FnMut(&mut Job) -> DomainResult<()>,
    ) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let current = jobs.get(&id).ok_or(JobStoreError::NotFound(id))?;

        let mut next = current.clone();
        f(&mut next)?;
        jobs.insert(id, next.clone());
        Ok(next)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.record(job.state());
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use mlq_core::{BlobKey, Bucket, FaultClass, JobKind};

    use super::*;

    fn job() -> Job {
        Job::new(
            JobId::new(),
            JobKind::Fit,
            vec!["in".into(), "out".into()],
            Utc::now(),
        )
    }

    #[test]
    fn insert_is_idempotent_on_id() {
        let store = InMemoryJobStore::new();
        let job = job();

        assert!(store.insert(job.clone()).unwrap());
        assert!(!store.insert(job.clone()).unwrap());
        assert_eq!(store.get(job.id()).unwrap(), Some(job));
    }

    #[test]
    fn modify_persists_accepted_transitions() {
        let store = InMemoryJobStore::new();
        let job = job();
        store.insert(job.clone()).unwrap();

        let updated = store.modify(job.id(), &mut |j| j.start(Utc::now())).unwrap();
        assert_eq!(updated.state(), JobState::Started);
        assert_eq!(store.get(job.id()).unwrap().unwrap().state(), JobState::Started);
    }

    #[test]
    fn modify_leaves_record_untouched_on_rejected_transition() {
        let store = InMemoryJobStore::new();
        let job = job();
        store.insert(job.clone()).unwrap();
        store.modify(job.id(), &mut |j| j.cancel(Utc::now())).unwrap();

        let err = store
            .modify(job.id(), &mut |j| {
                j.finish(BlobKey::new(Bucket::Models, "m"), Utc::now())
            })
            .unwrap_err();

        assert!(matches!(err, JobStoreError::Transition(_)));
        assert_eq!(store.get(job.id()).unwrap().unwrap().state(), JobState::Canceled);
    }

    #[test]
    fn modify_unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let id = JobId::new();
        assert!(matches!(
            store.modify(id, &mut |j| j.start(Utc::now())),
            Err(JobStoreError::NotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn stats_tracking() {
        let store = InMemoryJobStore::new();
        let ids: Vec<JobId> = (0..4)
            .map(|_| {
                let j = job();
                store.insert(j.clone()).unwrap();
                j.id()
            })
            .collect();

        store.modify(ids[0], &mut |j| j.start(Utc::now())).unwrap();
        store
            .modify(ids[1], &mut |j| {
                j.start(Utc::now())?;
                j.fault(FaultClass::Fatal, "bad", Utc::now()).map(|_| ())
            })
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.started, 1);
        assert_eq!(stats.failed, 1);
    }
}
