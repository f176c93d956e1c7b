//! OS signal handling.
//!
//! Ctrl+C (SIGINT) triggers graceful shutdown via [`Shutdown`]. Config reload
//! is driven by the file watcher, not by a signal.

use crate::lifecycle::Shutdown;

/// Wait for Ctrl+C, then trigger shutdown.
pub async fn shutdown_on_ctrl_c(shutdown: Shutdown) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Ctrl+C received, shutting down");
            shutdown.trigger();
        }
        Err(e) => {
            // Without a handler the process still exits on EOF or kill.
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    }
}
