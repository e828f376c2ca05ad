use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::worker::{Worker, WorkerConfig};

/// Handle to control and join a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    pub fn size(&self) -> usize {
        self.joins.len()
    }

    /// Request graceful shutdown and wait for every worker to finish its
    /// current episode.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

/// N independent workers sharing one queue and store.
#[derive(Debug)]
pub struct WorkerPool;

impl WorkerPool {
    /// Spawn `n` clones of `template` on the current tokio runtime, named
    /// `{base}-{i}` after the template's configured name.
    pub fn spawn(n: usize, template: Worker, config: WorkerConfig) -> WorkerPoolHandle {
        Self::spawn_with_cancel(n, template, config, CancellationToken::new())
    }

    /// Like [`WorkerPool::spawn`], stopping when `cancel` (or the handle's
    /// shutdown) fires.
    pub fn spawn_with_cancel(
        n: usize,
        template: Worker,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> WorkerPoolHandle {
        let joins = (0..n)
            .map(|i| {
                let worker_config = config.clone().with_name(format!("{}-{i}", config.name));
                let worker = template.clone().with_config(worker_config);
                tokio::spawn(worker.run(cancel.child_token()))
            })
            .collect();

        info!(workers = n, "worker pool started");
        WorkerPoolHandle { cancel, joins }
    }
}
