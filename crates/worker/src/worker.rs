//! One worker: lease, run one episode, write the outcome, repeat.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mlq_compute::Compute;
use mlq_core::{BlobKey, DomainError, Fault, FaultPolicy, Job, JobState};
use mlq_infra::blob::{BlobError, BlobTransport};
use mlq_infra::jobs::{
    DEFAULT_LEASE_TIMEOUT, JobQueue, JobStore, JobStoreError, Lease, QueueError, dequeue,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    /// How long to sleep when the queue is empty.
    pub poll_interval: Duration,
    /// How often a running episode renews its lease.
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::for_lease_timeout(DEFAULT_LEASE_TIMEOUT)
    }
}

impl WorkerConfig {
    /// Heartbeat at a third of the lease window.
    pub fn for_lease_timeout(lease_timeout: Duration) -> Self {
        Self {
            name: "worker".to_string(),
            poll_interval: Duration::from_millis(100),
            heartbeat_interval: lease_timeout / 3,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// How one leased delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeOutcome {
    Finished(BlobKey),
    /// Transient fault; the job is back in the queue.
    Retrying { retries_left: u32 },
    Failed,
    Stopped,
    /// The record was already terminal when leased.
    Skipped(JobState),
    /// The final state write was rejected (an operator canceled the job
    /// mid-episode); the output is discarded.
    Discarded,
    /// Another worker owns the job now; nothing was written.
    LeaseLost,
    /// No record exists for the leased id.
    Orphaned,
}

#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    transport: Arc<dyn BlobTransport>,
    compute: Arc<dyn Compute>,
    policy: FaultPolicy,
    config: WorkerConfig,
}

fn blob_fault(e: BlobError) -> Fault {
    match e {
        BlobError::Transfer(msg) => Fault::blob_transfer(msg),
        BlobError::NotFound(msg) => Fault::validation(format!("blob not found: {msg}")),
        BlobError::InvalidUrl(msg) => Fault::validation(format!("invalid blob url: {msg}")),
        BlobError::Forbidden(msg) => Fault::internal(format!("blob access denied: {msg}")),
    }
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        transport: Arc<dyn BlobTransport>,
        compute: Arc<dyn Compute>,
    ) -> Self {
        Self {
            store,
            queue,
            transport,
            compute,
            policy: FaultPolicy::default(),
            config: WorkerConfig::default(),
        }
    }

    pub fn with_policy(mut self, policy: FaultPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Process jobs until `cancel` fires. A running episode is completed
    /// before returning.
    pub async fn run(self, cancel: CancellationToken) {
        let name = self.config.name.clone();
        info!(worker = %name, queue = %self.queue.name(), "worker started");

        loop {
            let lease = tokio::select! {
                _ = cancel.cancelled() => break,
                lease = dequeue(self.queue.as_ref(), &name, self.config.poll_interval) => lease,
            };

            match lease {
                Ok(lease) => {
                    if let Err(e) = self.process(lease).await {
                        error!(worker = %name, error = %e, "episode aborted; lease left to expire");
                    }
                }
                Err(e) => {
                    error!(worker = %name, error = %e, "failed to lease job");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        info!(worker = %name, "worker stopped");
    }

    /// Run one leased delivery to completion.
    pub async fn process(&self, lease: Lease) -> Result<EpisodeOutcome, WorkerError> {
        let id = lease.job_id;
        let worker = self.config.name.as_str();

        let mut recovered = false;
        let job = match self.store.modify(id, &mut |job| {
            // Still Started: the previous holder vanished mid-episode.
            recovered = job.state() == JobState::Started;
            if recovered {
                job.release_lease()?;
            }
            job.start(Utc::now())
        }) {
            Ok(job) => job,
            Err(JobStoreError::Transition(_)) => {
                let state = self.store.get(id)?.map(|j| j.state());
                info!(job_id = %id, worker, state = ?state, "job already settled; skipping");
                self.settle(&lease, Settle::Ack)?;
                return Ok(state.map_or(EpisodeOutcome::Orphaned, EpisodeOutcome::Skipped));
            }
            Err(JobStoreError::NotFound(_)) => {
                warn!(job_id = %id, worker, "leased job has no record; dropping");
                self.settle(&lease, Settle::Ack)?;
                return Ok(EpisodeOutcome::Orphaned);
            }
            Err(e) => return Err(e.into()),
        };

        if recovered {
            warn!(
                job_id = %id,
                worker,
                deliveries = lease.deliveries,
                "recovered job from a lost lease"
            );
        }
        info!(
            job_id = %id,
            worker,
            kind = %job.kind(),
            episode = job.episodes(),
            retries_left = job.retries_left(),
            "job started"
        );

        let lease_lost = CancellationToken::new();
        let heartbeat = self.spawn_heartbeat(lease.clone(), lease_lost.clone());

        let attempt = tokio::select! {
            result = tokio::time::timeout(job.timeout(), self.execute(&job)) => Some(result),
            _ = lease_lost.cancelled() => None,
        };
        heartbeat.abort();

        let Some(attempt) = attempt else {
            warn!(job_id = %id, worker, "lease lost mid-episode; abandoning");
            return Ok(EpisodeOutcome::LeaseLost);
        };

        // Last ownership check before writing.
        match self.queue.heartbeat(&lease) {
            Ok(()) => {}
            Err(QueueError::LeaseLost(_)) => {
                warn!(job_id = %id, worker, "lease lost before state write; abandoning");
                return Ok(EpisodeOutcome::LeaseLost);
            }
            Err(e) => return Err(e.into()),
        }

        match attempt {
            Ok(Ok(result_ref)) => {
                let key = result_ref.clone();
                match self
                    .store
                    .modify(id, &mut |job| job.finish(key.clone(), Utc::now()))
                {
                    Ok(_) => {
                        info!(job_id = %id, worker, state = %JobState::Finished, result = %result_ref, "job finished");
                        self.settle(&lease, Settle::Ack)?;
                        Ok(EpisodeOutcome::Finished(result_ref))
                    }
                    Err(JobStoreError::Transition(e)) => self.discard(&lease, e),
                    Err(e) => Err(e.into()),
                }
            }
            Ok(Err(fault)) => {
                let class = self.policy.classify(fault.kind);
                let message = fault.to_string();
                match self
                    .store
                    .modify(id, &mut |job| job.fault(class, message.clone(), Utc::now()).map(|_| ()))
                {
                    Ok(job) => match job.state() {
                        JobState::Queued => {
                            warn!(
                                job_id = %id,
                                worker,
                                fault = %fault,
                                retries_left = job.retries_left(),
                                "transient fault; job requeued"
                            );
                            self.settle(&lease, Settle::Release)?;
                            Ok(EpisodeOutcome::Retrying {
                                retries_left: job.retries_left(),
                            })
                        }
                        _ => {
                            error!(
                                job_id = %id,
                                worker,
                                fault = %fault,
                                class = ?class,
                                retries_left = job.retries_left(),
                                state = %JobState::Failed,
                                "job failed"
                            );
                            self.settle(&lease, Settle::Ack)?;
                            Ok(EpisodeOutcome::Failed)
                        }
                    },
                    Err(JobStoreError::Transition(e)) => self.discard(&lease, e),
                    Err(e) => Err(e.into()),
                }
            }
            Err(_elapsed) => match self.store.modify(id, &mut |job| job.stop(Utc::now())) {
                Ok(_) => {
                    error!(
                        job_id = %id,
                        worker,
                        timeout = ?job.timeout(),
                        state = %JobState::Stopped,
                        "job exceeded its wall-clock budget"
                    );
                    self.settle(&lease, Settle::Ack)?;
                    Ok(EpisodeOutcome::Stopped)
                }
                Err(JobStoreError::Transition(e)) => self.discard(&lease, e),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Fetch inputs, run compute on the blocking pool, store the output.
    async fn execute(&self, job: &Job) -> Result<BlobKey, Fault> {
        let mut inputs = Vec::with_capacity(job.inputs().len());
        for url in job.inputs() {
            inputs.push(self.transport.fetch(url).await.map_err(blob_fault)?);
        }
        let output_url = job
            .output()
            .ok_or_else(|| Fault::validation("job has no output location"))?
            .to_string();

        let compute = self.compute.clone();
        let kind = job.kind();
        let output = tokio::task::spawn_blocking(move || compute.run(kind, &inputs))
            .await
            .map_err(|e| Fault::internal(format!("compute task failed: {e}")))??;

        debug!(job_id = %job.id(), bytes = output.len(), "storing output");
        self.transport
            .put(&output_url, output)
            .await
            .map_err(blob_fault)?;
        Ok(job.output_key())
    }

    fn spawn_heartbeat(
        &self,
        lease: Lease,
        lease_lost: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match queue.heartbeat(&lease) {
                    Ok(()) => {}
                    Err(QueueError::LeaseLost(_)) => {
                        lease_lost.cancel();
                        return;
                    }
                    Err(e) => {
                        warn!(job_id = %lease.job_id, worker = %lease.worker, error = %e, "heartbeat failed");
                    }
                }
            }
        })
    }

    fn discard(
        &self,
        lease: &Lease,
        rejected: DomainError,
    ) -> Result<EpisodeOutcome, WorkerError> {
        warn!(
            job_id = %lease.job_id,
            worker = %lease.worker,
            error = %rejected,
            "state write rejected; discarding episode result"
        );
        self.settle(lease, Settle::Ack)?;
        Ok(EpisodeOutcome::Discarded)
    }

    fn settle(&self, lease: &Lease, settle: Settle) -> Result<(), WorkerError> {
        let result = match settle {
            Settle::Ack => self.queue.ack(lease),
            Settle::Release => self.queue.release(lease),
        };
        match result {
            Ok(()) => Ok(()),
            Err(QueueError::LeaseLost(_)) => {
                warn!(job_id = %lease.job_id, worker = %lease.worker, "lease expired before it was settled");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Copy, Clone)]
enum Settle {
    Ack,
    Release,
}
