use anyhow::Context;
use mlq_api::app::{AppServices, build_app};
use mlq_infra::Config;
use mlq_worker::{WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mlq_observability::init();

    let config = Config::from_env().context("invalid configuration")?;
    let services = AppServices::from_config(&config)?;

    // Workers in this process share its in-memory blobs; WORKERS=0 leaves the
    // queue to standalone workers.
    let pool = WorkerPool::spawn(
        config.workers,
        services.embedded_worker(),
        WorkerConfig::for_lease_timeout(config.lease_timeout).with_name("embedded"),
    );

    let app = build_app(&services);
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        public_url = %config.public_url,
        queue = %config.queue_name,
        workers = config.workers,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await
        .context("server error")?;

    tracing::info!("shutdown requested");
    pool.shutdown().await;
    Ok(())
}
