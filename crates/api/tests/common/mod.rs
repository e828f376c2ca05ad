#![allow(dead_code)]

use std::time::Duration;

use mlq_api::app::{AppServices, build_app};
use mlq_compute::{Column, Table};
use mlq_infra::Config;
use mlq_worker::{WorkerConfig, WorkerPool};
use tokio_util::sync::CancellationToken;

/// Gateway on an ephemeral port, with workers started on demand.
pub struct TestServer {
    pub base_url: String,
    pub services: AppServices,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn(workers: usize) -> Self {
        Self::spawn_with(workers, |_| {}).await
    }

    pub async fn spawn_with(workers: usize, configure: impl FnOnce(&mut Config)) -> Self {
        // Bind first so presigned URLs can point back at this server.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let mut config = Config {
            public_url: base_url.clone(),
            workers,
            ..Config::default()
        };
        configure(&mut config);

        let services = AppServices::in_memory(&config);
        let app = build_app(&services);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let srv = Self {
            base_url,
            services,
            cancel: CancellationToken::new(),
            handle,
        };
        srv.start_workers(workers);
        srv
    }

    /// Start `n` more embedded workers; they stop when the server is dropped.
    pub fn start_workers(&self, n: usize) {
        if n == 0 {
            return;
        }
        let config = WorkerConfig::default()
            .with_name("test")
            .with_poll_interval(Duration::from_millis(10));
        // Detached: the shared token stops them.
        let _pool = WorkerPool::spawn_with_cancel(
            n,
            self.services.embedded_worker(),
            config,
            self.cancel.child_token(),
        );
    }

    pub fn client(&self) -> mlq_client::Client {
        mlq_client::Client::new(&self.base_url).with_poll_interval(Duration::from_millis(20))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

pub fn training_table() -> Table {
    Table::new(vec![
        Column::new("x", vec![0.0, 0.5, 1.0, 9.0, 9.5, 10.0]),
        Column::new("y", vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]),
    ])
    .unwrap()
}

pub fn test_table() -> Table {
    Table::single("x", vec![0.2, 9.8, 0.9, 10.5])
}
