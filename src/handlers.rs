//! Graceful shutdown handling for LVE Node
//!
//! Listens for SIGINT/SIGTERM and resolves when the node should stop. The
//! caller then stops the producer, closes peer sockets, and flushes state
//! before exiting.

use tracing::info;

/// Shutdown signal handling.
pub struct Handlers;

impl Handlers {
    /// Wait for SIGINT (Ctrl+C) or SIGTERM.
    pub async fn wait_for_shutdown_signal() {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm = signal(SignalKind::terminate()).expect("sigterm handler installs");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received Ctrl+C");
        }
    }
}
