//! OS signal handling.
//!
//! # Responsibilities
//! - Subscribe to SIGINT (Ctrl+C) and, on unix, SIGTERM
//! - Call `Server::stop` exactly once on the first signal
//! - Stop listening when the server stops for any other reason
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Further signals after the first one are left to the default handler

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::http::server::Server;

async fn terminate() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    std::future::pending::<()>().await;
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

/// Spawn the signal listener of `server`.
pub(crate) fn spawn(server: Arc<Server>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt() => {
                tracing::info!(signal = "SIGINT", "Shutdown signal received");
            }
            _ = terminate() => {
                tracing::info!(signal = "SIGTERM", "Shutdown signal received");
            }
            _ = server.signals_released() => {
                tracing::debug!("Signal listener released");
                return;
            }
        }
        server.stop().await;
    })
}
