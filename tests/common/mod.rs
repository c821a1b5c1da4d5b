//! Shared utilities for integration tests.

use std::sync::Arc;
use std::time::Duration;

use switchyard::{Config, Server, ServerError};
use tokio::task::JoinHandle;

/// Default configuration bound to an OS-assigned port.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.port = 0;
    config
}

/// A server running in the background.
pub struct Running {
    pub server: Arc<Server>,
    pub task: JoinHandle<Result<(), ServerError>>,
}

impl Running {
    /// `http://<bound address><path>`
    pub fn url(&self, path: &str) -> String {
        let addr = self.server.local_addr().expect("server is bound");
        format!("http://{addr}{path}")
    }

    /// Stop the server and return the result of `start`.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        self.server.stop().await;
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("start returns after stop")
            .expect("start task panicked")
    }
}

/// Start `server` in the background and wait until it accepts requests.
pub async fn start(server: Server) -> Running {
    let server = Arc::new(server);
    let task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.start().await })
    };
    wait_ready(&server).await;
    Running { server, task }
}

/// Poll until the server reports ready.
pub async fn wait_ready(server: &Server) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !server.is_ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server became ready");
}

/// HTTP client that does not reuse connections between tests.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .expect("client builds")
}
