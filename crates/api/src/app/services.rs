//! Gateway services: job submission, status and result lookup, plus the
//! process-level wiring of queue, store and object store handles.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mlq_compute::{FaultInjector, NearestCentroidCompute};
use mlq_core::{
    BlobKey, BlobMethod, Bucket, DatasetId, DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_RETRIES, Job, JobId,
    JobKind, JobState,
};
use mlq_infra::Config;
use mlq_infra::blob::{BlobError, InMemoryBlobTransport, InMemoryObjectStore, ObjectStore, PresignedUrl};
use mlq_infra::jobs::{
    InMemoryJobQueue, InMemoryJobStore, JobQueue, JobStore, JobStoreError, QueueError,
};
#[cfg(feature = "redis")]
use mlq_infra::jobs::{RedisJobQueue, RedisJobStore};
use mlq_worker::Worker;
use tracing::{info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job {id} is {state}")]
    InvalidState { id: JobId, state: JobState },
    #[error("missing parameter: {0}")]
    MissingParam(&'static str),
    #[error("invalid parameter {name}: {reason}")]
    InvalidParam { name: &'static str, reason: String },
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Blob(#[from] BlobError),
}

/// Parameters fixed on every job at submission.
#[derive(Debug, Clone)]
pub struct SubmitSettings {
    pub max_retries: u32,
    pub job_timeout: Duration,
    pub presign_ttl: Duration,
}

impl Default for SubmitSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            presign_ttl: Duration::from_secs(3600),
        }
    }
}

impl From<&Config> for SubmitSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            job_timeout: config.job_timeout,
            presign_ttl: config.presign_ttl,
        }
    }
}

/// A fresh dataset id with the URL to upload it to.
#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub id: DatasetId,
    pub url: PresignedUrl,
}

pub struct JobService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    objects: Arc<dyn ObjectStore>,
    settings: SubmitSettings,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        objects: Arc<dyn ObjectStore>,
        settings: SubmitSettings,
    ) -> Self {
        Self {
            store,
            queue,
            objects,
            settings,
        }
    }

    fn presign(&self, key: &BlobKey, method: BlobMethod) -> Result<PresignedUrl, ServiceError> {
        Ok(self.objects.presign(key, method, self.settings.presign_ttl)?)
    }

    pub fn upload(&self) -> Result<UploadTicket, ServiceError> {
        let id = DatasetId::new();
        let url = self.presign(&BlobKey::new(Bucket::Datasets, id.to_string()), BlobMethod::Put)?;
        info!(dataset_id = %id, "dataset upload requested");
        Ok(UploadTicket { id, url })
    }

    /// Record and enqueue a job reading `inputs` and writing to its own id in
    /// the kind's output bucket.
    #[instrument(skip(self, inputs), err)]
    pub fn submit(&self, kind: JobKind, inputs: &[BlobKey]) -> Result<JobId, ServiceError> {
        let id = JobId::new();
        let mut args = inputs
            .iter()
            .map(|key| self.presign(key, BlobMethod::Get).map(PresignedUrl::into_string))
            .collect::<Result<Vec<_>, _>>()?;
        let output = BlobKey::new(kind.output_bucket(), id.to_string());
        args.push(self.presign(&output, BlobMethod::Put)?.into_string());

        let job = Job::new(id, kind, args, Utc::now())
            .with_max_retries(self.settings.max_retries)
            .with_timeout(self.settings.job_timeout);
        self.store.insert(job)?;
        if let Err(e) = self.queue.enqueue(id) {
            // Nothing can lease the record now; settle it so it is not left queued.
            if let Err(cancel_err) = self.store.modify(id, &mut |job| job.cancel(Utc::now())) {
                warn!(job_id = %id, error = %cancel_err, "failed to settle unqueued job");
            }
            return Err(e.into());
        }

        info!(job_id = %id, kind = %kind, queue = %self.queue.name(), "job enqueued");
        Ok(id)
    }

    pub fn submit_fit(&self, dataset_id: &str) -> Result<JobId, ServiceError> {
        let dataset = parse_dataset("id", dataset_id)?;
        self.submit(JobKind::Fit, &[dataset])
    }

    pub fn submit_predict(&self, dataset_id: &str, model_id: &str) -> Result<JobId, ServiceError> {
        let dataset = parse_dataset("dataset_id", dataset_id)?;
        let model: JobId = model_id.parse().map_err(|e: mlq_core::DomainError| {
            ServiceError::InvalidParam {
                name: "model_id",
                reason: e.to_string(),
            }
        })?;
        self.submit(
            JobKind::Predict,
            &[dataset, BlobKey::new(Bucket::Models, model.to_string())],
        )
    }

    /// Current record of a job.
    pub fn status(&self, id: &str) -> Result<Job, ServiceError> {
        let job_id: JobId = id
            .parse()
            .map_err(|_| ServiceError::NotFound(id.to_string()))?;
        self.store
            .get(job_id)?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    /// Short-lived download URL for a finished job's output.
    pub fn result(&self, id: &str) -> Result<PresignedUrl, ServiceError> {
        let job = self.status(id)?;
        match (job.state(), job.result_ref()) {
            (JobState::Finished, Some(key)) => self.presign(key, BlobMethod::Get),
            (state, _) => Err(ServiceError::InvalidState { id: job.id(), state }),
        }
    }

    /// Administrative cancel of a queued or running job.
    ///
    /// A running episode notices on its next state write and discards its
    /// output.
    pub fn cancel(&self, id: JobId) -> Result<Job, ServiceError> {
        let job = match self.store.modify(id, &mut |job| job.cancel(Utc::now())) {
            Ok(job) => job,
            Err(JobStoreError::NotFound(_)) => return Err(ServiceError::NotFound(id.to_string())),
            Err(JobStoreError::Transition(_)) => {
                let state = self.store.get(id)?.map_or(JobState::Canceled, |j| j.state());
                return Err(ServiceError::InvalidState { id, state });
            }
            Err(e) => return Err(e.into()),
        };
        let dequeued = self.queue.remove(id)?;
        info!(job_id = %id, dequeued, state = %job.state(), "job canceled");
        Ok(job)
    }
}

fn parse_dataset(name: &'static str, raw: &str) -> Result<BlobKey, ServiceError> {
    let id: DatasetId = raw.parse().map_err(|e: mlq_core::DomainError| {
        ServiceError::InvalidParam {
            name,
            reason: e.to_string(),
        }
    })?;
    Ok(BlobKey::new(Bucket::Datasets, id.to_string()))
}

/// Everything the gateway process wires together at startup.
#[derive(Clone)]
pub struct AppServices {
    pub jobs: Arc<JobService>,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    /// Blobs are held by the gateway and served through its `/blobs` routes.
    pub blobs: Arc<InMemoryObjectStore>,
    pub simulated_fault_rate: f64,
}

impl AppServices {
    /// Redis-backed queue and store when `REDIS_URL` is set (and the feature
    /// is enabled), in-memory otherwise.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        match &config.redis_url {
            #[cfg(feature = "redis")]
            Some(url) => {
                let store = Arc::new(RedisJobStore::new(url)?);
                let queue = Arc::new(
                    RedisJobQueue::new(url, &config.queue_name)?
                        .with_lease_timeout(config.lease_timeout),
                );
                info!(queue = %config.queue_name, "using redis queue and store");
                Ok(Self::with_backends(config, store, queue))
            }
            #[cfg(not(feature = "redis"))]
            Some(_) => anyhow::bail!("REDIS_URL is set but the gateway was built without the `redis` feature"),
            None => Ok(Self::in_memory(config)),
        }
    }

    pub fn in_memory(config: &Config) -> Self {
        let store = InMemoryJobStore::arc();
        let queue = Arc::new(InMemoryJobQueue::with_lease_timeout(
            config.queue_name.clone(),
            config.lease_timeout,
        ));
        Self::with_backends(config, store, queue)
    }

    pub fn with_backends(
        config: &Config,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        let blobs = Arc::new(InMemoryObjectStore::new(config.public_url.clone()));
        let jobs = Arc::new(JobService::new(
            store.clone(),
            queue.clone(),
            blobs.clone(),
            SubmitSettings::from(config),
        ));
        Self {
            jobs,
            store,
            queue,
            blobs,
            simulated_fault_rate: config.simulated_fault_rate,
        }
    }

    /// Worker sharing this process's queue, store and blobs.
    pub fn embedded_worker(&self) -> Worker {
        Worker::new(
            self.store.clone(),
            self.queue.clone(),
            Arc::new(InMemoryBlobTransport::new(self.blobs.clone())),
            Arc::new(FaultInjector::new(
                NearestCentroidCompute::new(),
                self.simulated_fault_rate,
            )),
        )
    }
}
