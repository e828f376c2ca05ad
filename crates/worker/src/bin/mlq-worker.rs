//! Standalone worker process backed by Redis.

use std::sync::Arc;

use anyhow::Context;
use mlq_compute::{FaultInjector, NearestCentroidCompute};
use mlq_infra::Config;
use mlq_infra::blob::HttpBlobTransport;
use mlq_infra::jobs::{RedisJobQueue, RedisJobStore};
use mlq_worker::{Worker, WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mlq_observability::init();

    let config = Config::from_env().context("invalid configuration")?;
    let redis_url = config
        .redis_url
        .clone()
        .context("REDIS_URL must be set for a standalone worker")?;

    let store = RedisJobStore::new(&redis_url).context("failed to open job store")?;
    let queue = RedisJobQueue::new(&redis_url, &config.queue_name)
        .context("failed to open job queue")?
        .with_lease_timeout(config.lease_timeout);
    let transport = HttpBlobTransport::with_timeout(config.blob_timeout)
        .context("failed to build blob transport")?;
    let compute = FaultInjector::new(NearestCentroidCompute::new(), config.simulated_fault_rate);

    let template = Worker::new(
        Arc::new(store),
        Arc::new(queue),
        Arc::new(transport),
        Arc::new(compute),
    );
    let worker_config = WorkerConfig::for_lease_timeout(config.lease_timeout)
        .with_name(format!("worker-{}", std::process::id()));

    let pool = WorkerPool::spawn(config.workers, template, worker_config);
    tracing::info!(queue = %config.queue_name, workers = config.workers, "worker process ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");
    pool.shutdown().await;
    Ok(())
}
