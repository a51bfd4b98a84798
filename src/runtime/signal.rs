//! Process signal hook.

use crate::core::{DrainReport, RequestCoordinator, Runner};

/// Wait for Ctrl-C, then shut the coordinator down.
///
/// Resolves with the drain report once every batch has been stopped or the
/// shutdown deadline has passed.
///
/// # Errors
///
/// Returns the I/O error if the signal handler cannot be installed.
pub async fn shutdown_on_ctrl_c<R: Runner>(
    coordinator: &RequestCoordinator<R>,
) -> std::io::Result<DrainReport> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");
    Ok(coordinator.shutdown().await)
}
