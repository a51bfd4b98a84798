//! Request, batch, result and metrics types shared across the scheduler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;

/// Registry key for a dispatched batch.
pub type BatchId = String;

/// A single bot participant. Ids are unique within one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotIdentity {
    /// Request-unique identifier.
    pub id: u64,
    /// Display name used when joining.
    pub name: String,
}

impl BotIdentity {
    /// Create a bot identity.
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Parsed inbound join request. Immutable once validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Bots to dispatch.
    pub bots: Vec<BotIdentity>,
    /// Meeting identifier.
    pub meeting_id: String,
    /// Meeting passcode supplied by the caller.
    pub credential: String,
    /// Hold-open duration, always at least one minute.
    pub duration_minutes: u32,
}

impl JoinRequest {
    /// Build a request, flooring the duration and clamping it to at least one minute.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(
        bots: Vec<BotIdentity>,
        meeting_id: impl Into<String>,
        credential: impl Into<String>,
        duration_minutes: f64,
    ) -> Self {
        let duration_minutes = if duration_minutes.is_finite() {
            duration_minutes.floor().clamp(1.0, f64::from(u32::MAX)) as u32
        } else {
            1
        };
        Self {
            bots,
            meeting_id: meeting_id.into(),
            credential: credential.into(),
            duration_minutes,
        }
    }

    /// Reject requests that must not touch any resource.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Validation` for an empty bot list, a blank
    /// meeting id or credential, or duplicate bot ids.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.bots.is_empty() {
            return Err(SchedulerError::Validation("bot list is empty".into()));
        }
        if self.meeting_id.trim().is_empty() {
            return Err(SchedulerError::Validation("meeting id is required".into()));
        }
        if self.credential.trim().is_empty() {
            return Err(SchedulerError::Validation("credential is required".into()));
        }
        let mut seen = std::collections::HashSet::with_capacity(self.bots.len());
        for bot in &self.bots {
            if !seen.insert(bot.id) {
                return Err(SchedulerError::Validation(format!(
                    "duplicate bot id {}",
                    bot.id
                )));
            }
        }
        Ok(())
    }
}

/// Connection hints every runner is expected to honor at best effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Signed credential issued for this request.
    pub signature: String,
    /// Join with camera off.
    pub disable_video: bool,
    /// Join with microphone and speaker off.
    pub disable_audio: bool,
    /// Request the lowest rendering resolution.
    pub low_resolution: bool,
}

impl ConnectionParams {
    /// Low-cost connection profile used for every batch.
    #[must_use]
    pub const fn optimized(signature: String) -> Self {
        Self {
            signature,
            disable_video: true,
            disable_audio: true,
            low_resolution: true,
        }
    }
}

/// A bounded group of bots dispatched to one runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Registry key, unique across concurrently running batches.
    pub id: BatchId,
    /// Bots in this batch.
    pub bots: Vec<BotIdentity>,
    /// Meeting identifier.
    pub meeting_id: String,
    /// Meeting passcode.
    pub credential: String,
    /// Signature and connection flags.
    pub connection: ConnectionParams,
    /// Hold-open duration in minutes.
    pub duration_minutes: u32,
}

impl Batch {
    /// Number of bots carried by this batch.
    #[must_use]
    pub fn bot_count(&self) -> usize {
        self.bots.len()
    }
}

/// Per-bot outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BotOutcome {
    /// The runner confirmed the join.
    Joined,
    /// The runner did not report in time; the session is trusted to be running.
    Held {
        /// Why the result was synthesized.
        note: String,
    },
    /// The bot did not join.
    Failed {
        /// Underlying error message.
        error: String,
    },
}

/// Result for one bot of one request. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotResult {
    /// Bot id.
    pub bot_id: u64,
    /// Bot display name.
    pub bot_name: String,
    /// Outcome.
    pub outcome: BotOutcome,
    /// Whether the session is being held open.
    pub kept_alive: bool,
    /// When the held session will be closed (ms since epoch).
    pub scheduled_termination_at_ms: Option<u128>,
}

impl BotResult {
    /// A held-open success.
    #[must_use]
    pub fn joined(bot: &BotIdentity, termination_at_ms: u128) -> Self {
        Self {
            bot_id: bot.id,
            bot_name: bot.name.clone(),
            outcome: BotOutcome::Joined,
            kept_alive: true,
            scheduled_termination_at_ms: Some(termination_at_ms),
        }
    }

    /// A success synthesized after the startup-report timeout.
    #[must_use]
    pub fn held(bot: &BotIdentity, termination_at_ms: u128, note: impl Into<String>) -> Self {
        Self {
            bot_id: bot.id,
            bot_name: bot.name.clone(),
            outcome: BotOutcome::Held { note: note.into() },
            kept_alive: true,
            scheduled_termination_at_ms: Some(termination_at_ms),
        }
    }

    /// A failed bot.
    #[must_use]
    pub fn failed(bot: &BotIdentity, error: impl Into<String>) -> Self {
        Self {
            bot_id: bot.id,
            bot_name: bot.name.clone(),
            outcome: BotOutcome::Failed {
                error: error.into(),
            },
            kept_alive: false,
            scheduled_termination_at_ms: None,
        }
    }

    /// True for joined and held bots.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.outcome, BotOutcome::Failed { .. })
    }

    /// Error message for failed bots.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            BotOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Load snapshot, recomputed from the registry and host on every read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Batches currently in the registry.
    pub active_batch_count: usize,
    /// Sum of bot counts over registry entries.
    pub active_bot_count: usize,
    /// Host memory in use, `[0, 1]`.
    pub memory_used_fraction: f64,
    /// Estimated cpu load, `[0, 1]`.
    pub cpu_load_estimate: f64,
    /// When this snapshot was taken (ms since epoch).
    pub last_sampled_at_ms: u128,
}

/// Lifecycle states of a dispatched batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Waiting for a gate permit.
    Queued,
    /// Holding a permit, runner not started yet.
    Admitted,
    /// Runner started, no report yet.
    Running,
    /// Runner reported per-bot outcomes.
    Completed,
    /// Runner reported a fatal error.
    Errored,
    /// Runner exited before reporting.
    Exited,
    /// No report within the startup window; session held anyway.
    TimedOutHeld,
    /// Hold-open elapsed, shutdown in progress.
    TerminationScheduled,
    /// Runner stopped and handle removed.
    Terminated,
}

impl WorkerState {
    /// Terminal failure states never hold a session open.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Errored | Self::Exited)
    }
}

/// Read-time view of a registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Batch id.
    pub batch_id: BatchId,
    /// Current lifecycle state.
    pub state: WorkerState,
    /// Bots carried by the batch.
    pub bot_count: usize,
    /// Admission time (ms since epoch).
    pub started_at_ms: u128,
    /// Minutes since admission.
    pub elapsed_minutes: f64,
    /// Minutes until scheduled termination, never negative.
    pub remaining_minutes: f64,
    /// Scheduled termination time (ms since epoch).
    pub scheduled_termination_at_ms: u128,
}

/// Overall outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Every bot succeeded.
    Success,
    /// At least one success and at least one failure.
    PartialSuccess,
    /// Every batch failed outright.
    TotalFailure,
}

/// Per-category counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    /// Bots the runner confirmed.
    pub joined: usize,
    /// Bots held after the startup-report timeout.
    pub held: usize,
    /// Bots that failed.
    pub failed: usize,
}

/// Aggregated response for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSummary {
    /// Run discriminator shared by all batches of the request.
    pub request_id: String,
    /// Meeting identifier.
    pub meeting_id: String,
    /// Overall status.
    pub status: RequestStatus,
    /// Bots in the request.
    pub total_bots: usize,
    /// Batches dispatched.
    pub batch_count: usize,
    /// Successful bots (joined and held).
    pub succeeded: usize,
    /// Failed bots.
    pub failed: usize,
    /// Per-category counts.
    pub breakdown: Breakdown,
    /// Failed bot counts grouped by error message.
    pub failures_by_reason: BTreeMap<String, usize>,
    /// Latest scheduled close time among held sessions (ms since epoch).
    pub scheduled_close_at_ms: Option<u128>,
    /// Hold-open duration applied.
    pub duration_minutes: u32,
    /// Load snapshot after the request settled.
    pub metrics: SystemMetrics,
    /// One result per bot, in batch creation order.
    pub results: Vec<BotResult>,
}

impl JoinSummary {
    /// Fold flattened results into a summary.
    #[must_use]
    pub fn fold(
        request_id: String,
        request: &JoinRequest,
        batch_count: usize,
        results: Vec<BotResult>,
        metrics: SystemMetrics,
    ) -> Self {
        let mut breakdown = Breakdown::default();
        let mut failures_by_reason = BTreeMap::new();
        let mut scheduled_close_at_ms: Option<u128> = None;
        for result in &results {
            match &result.outcome {
                BotOutcome::Joined => breakdown.joined += 1,
                BotOutcome::Held { .. } => breakdown.held += 1,
                BotOutcome::Failed { error } => {
                    breakdown.failed += 1;
                    *failures_by_reason.entry(error.clone()).or_insert(0) += 1;
                }
            }
            if let Some(at) = result.scheduled_termination_at_ms {
                scheduled_close_at_ms = Some(scheduled_close_at_ms.map_or(at, |cur| cur.max(at)));
            }
        }
        let succeeded = breakdown.joined + breakdown.held;
        let status = if breakdown.failed == 0 {
            RequestStatus::Success
        } else if succeeded == 0 {
            RequestStatus::TotalFailure
        } else {
            RequestStatus::PartialSuccess
        };
        Self {
            request_id,
            meeting_id: request.meeting_id.clone(),
            status,
            total_bots: results.len(),
            batch_count,
            succeeded,
            failed: breakdown.failed,
            breakdown,
            failures_by_reason,
            scheduled_close_at_ms,
            duration_minutes: request.duration_minutes,
            metrics,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bots(n: u64) -> Vec<BotIdentity> {
        (1..=n).map(|i| BotIdentity::new(i, format!("bot-{i}"))).collect()
    }

    #[test]
    fn duration_is_floored_and_clamped() {
        assert_eq!(JoinRequest::new(bots(1), "m", "p", 2.9).duration_minutes, 2);
        assert_eq!(JoinRequest::new(bots(1), "m", "p", 0.2).duration_minutes, 1);
        assert_eq!(JoinRequest::new(bots(1), "m", "p", -5.0).duration_minutes, 1);
        assert_eq!(JoinRequest::new(bots(1), "m", "p", f64::NAN).duration_minutes, 1);
    }

    #[test]
    fn validation_rejects_missing_fields() {
        assert!(JoinRequest::new(vec![], "m", "p", 1.0).validate().is_err());
        assert!(JoinRequest::new(bots(2), " ", "p", 1.0).validate().is_err());
        assert!(JoinRequest::new(bots(2), "m", "", 1.0).validate().is_err());
        let dup = vec![BotIdentity::new(1, "a"), BotIdentity::new(1, "b")];
        assert!(JoinRequest::new(dup, "m", "p", 1.0).validate().is_err());
        assert!(JoinRequest::new(bots(2), "m", "p", 1.0).validate().is_ok());
    }

    #[test]
    fn summary_status_reflects_mix() {
        let request = JoinRequest::new(bots(3), "m", "p", 1.0);
        let b = &request.bots;
        let all_ok = vec![BotResult::joined(&b[0], 10), BotResult::held(&b[1], 20, "slow")];
        let summary = JoinSummary::fold("r".into(), &request, 1, all_ok, SystemMetrics::default());
        assert_eq!(summary.status, RequestStatus::Success);
        assert_eq!(summary.breakdown.held, 1);
        assert_eq!(summary.scheduled_close_at_ms, Some(20));

        let mixed = vec![BotResult::joined(&b[0], 10), BotResult::failed(&b[1], "boom")];
        let summary = JoinSummary::fold("r".into(), &request, 2, mixed, SystemMetrics::default());
        assert_eq!(summary.status, RequestStatus::PartialSuccess);
        assert_eq!(summary.failures_by_reason.get("boom"), Some(&1));

        let none = vec![BotResult::failed(&b[0], "x"), BotResult::failed(&b[1], "x")];
        let summary = JoinSummary::fold("r".into(), &request, 2, none, SystemMetrics::default());
        assert_eq!(summary.status, RequestStatus::TotalFailure);
        assert_eq!(summary.scheduled_close_at_ms, None);
    }
}
