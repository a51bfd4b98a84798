//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::model::SystemMetrics;

/// Why the system monitor refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    /// Host memory usage is above the high-water mark.
    MemoryPressure,
    /// Estimated cpu load is above the high-water mark.
    CpuPressure,
    /// Admitting the bots would pass the system-wide bot ceiling.
    BotCeiling,
}

impl std::fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryPressure => write!(f, "memory usage above high-water mark"),
            Self::CpuPressure => write!(f, "cpu load above high-water mark"),
            Self::BotCeiling => write!(f, "system bot ceiling reached"),
        }
    }
}

/// Errors produced by scheduler components.
///
/// Only request-level problems surface here. A batch that fails to launch is
/// reported through per-bot results, never as an `Err`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The request is malformed (no bots, missing meeting id or credential).
    #[error("invalid request: {0}")]
    Validation(String),
    /// The system monitor refused admission.
    #[error("capacity exceeded: {reason}")]
    CapacityExceeded {
        /// Which limit tripped.
        reason: RefusalReason,
        /// Snapshot taken when the decision was made, for retry timing.
        metrics: SystemMetrics,
    },
    /// The coordinator has been shut down.
    #[error("scheduler is shutting down")]
    ShuttingDown,
    /// The credential issuer could not sign a connection credential.
    #[error("credential error: {0}")]
    Credential(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors raised at the runner seam while launching a batch.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The execution unit could not be launched.
    #[error("launch failed: {0}")]
    Launch(String),
    /// I/O failure talking to the execution unit.
    #[error("runner io: {0}")]
    Io(#[from] std::io::Error),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
