//! Transport-facing request/response models.
//!
//! Framework-agnostic: an HTTP layer deserializes a [`JoinRequestBody`],
//! hands it to [`submit_json`] and serializes whatever comes back.

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::core::{
    BotIdentity, BotIdentitySynthesizer, JoinRequest, JoinSummary, RefusalReason,
    RequestCoordinator, RequestStatus, Runner, SchedulerError, SystemMetrics, WorkerStatus,
};

/// Join request as received from a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequestBody {
    /// Explicit bots.
    #[serde(default)]
    pub bots: Vec<BotIdentity>,
    /// Extra bots to synthesize after the explicit ones.
    #[serde(default)]
    pub bot_count: Option<usize>,
    /// Meeting identifier.
    #[serde(default)]
    pub meeting_id: String,
    /// Meeting passcode.
    #[serde(default)]
    pub credential: String,
    /// Hold-open duration; the configured default when absent.
    #[serde(default)]
    pub duration_minutes: Option<f64>,
}

/// Outcome class of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    /// Every bot succeeded.
    Success,
    /// Some bots failed.
    PartialSuccess,
    /// Every batch failed.
    TotalFailure,
    /// The request was malformed.
    Invalid,
    /// The host refused admission.
    CapacityExceeded,
    /// The scheduler is shutting down or a dependency failed.
    Unavailable,
}

impl From<RequestStatus> for SubmitStatus {
    fn from(status: RequestStatus) -> Self {
        match status {
            RequestStatus::Success => Self::Success,
            RequestStatus::PartialSuccess => Self::PartialSuccess,
            RequestStatus::TotalFailure => Self::TotalFailure,
        }
    }
}

/// Details of an admission refusal, for retry timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityErrorBody {
    /// Which limit tripped.
    pub reason: RefusalReason,
    /// Human-readable message.
    pub message: String,
    /// Load snapshot at refusal time.
    pub metrics: SystemMetrics,
}

/// Response to a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Whether the request was admitted and dispatched.
    pub accepted: bool,
    /// Outcome class.
    pub status: SubmitStatus,
    /// Aggregated results when accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<JoinSummary>,
    /// Refusal details when capacity was exceeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_error: Option<CapacityErrorBody>,
    /// Message for other rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitResponse {
    fn rejected(status: SubmitStatus, err: &SchedulerError) -> Self {
        Self {
            accepted: false,
            status,
            summary: None,
            capacity_error: None,
            error: Some(err.to_string()),
        }
    }
}

impl From<Result<JoinSummary, SchedulerError>> for SubmitResponse {
    fn from(result: Result<JoinSummary, SchedulerError>) -> Self {
        match result {
            Ok(summary) => Self {
                accepted: true,
                status: summary.status.into(),
                summary: Some(summary),
                capacity_error: None,
                error: None,
            },
            Err(SchedulerError::CapacityExceeded { reason, metrics }) => Self {
                accepted: false,
                status: SubmitStatus::CapacityExceeded,
                summary: None,
                capacity_error: Some(CapacityErrorBody {
                    reason,
                    message: reason.to_string(),
                    metrics,
                }),
                error: None,
            },
            Err(err @ SchedulerError::Validation(_)) => Self::rejected(SubmitStatus::Invalid, &err),
            Err(err) => Self::rejected(SubmitStatus::Unavailable, &err),
        }
    }
}

/// Response to a terminate-all call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TerminateAllResponse {
    /// Batches stopped.
    pub terminated_count: usize,
    /// Bots those batches carried.
    pub total_bots: usize,
    /// Batches that needed a forced stop.
    pub forced_count: usize,
}

/// Live batches and load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveListResponse {
    /// Live batch statuses.
    pub batches: Vec<WorkerStatus>,
    /// Sum of their bot counts.
    pub total_bots: usize,
    /// Current load snapshot.
    pub metrics: SystemMetrics,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag; false once shutdown has begun.
    pub ok: bool,
    /// Live batches.
    pub active_batches: usize,
    /// Live bots.
    pub active_bots: usize,
}

/// Merge explicit bots with `bot_count` synthesized ones into a request.
///
/// The total is checked against the system bot ceiling before anything is
/// synthesized. Everything else is validated by [`RequestCoordinator::submit`].
///
/// # Errors
///
/// `Validation` when the body asks for more bots than the ceiling allows, or
/// when the synthesized ids would overflow.
pub fn build_join_request(
    body: JoinRequestBody,
    synthesizer: &dyn BotIdentitySynthesizer,
    config: &SchedulerConfig,
) -> Result<JoinRequest, SchedulerError> {
    let mut bots = body.bots;
    if let Some(count) = body.bot_count.filter(|n| *n > 0) {
        let ceiling = config.system_bot_ceiling;
        if bots.len().saturating_add(count) > ceiling {
            return Err(SchedulerError::Validation(format!(
                "{} explicit bots plus bot_count {count} exceed the system ceiling of {ceiling}",
                bots.len()
            )));
        }
        let extra = synthesizer.generate(count, &bots)?;
        bots.extend(extra);
    }
    let duration = body
        .duration_minutes
        .unwrap_or_else(|| f64::from(config.default_duration_minutes));
    Ok(JoinRequest::new(bots, body.meeting_id, body.credential, duration))
}

/// Run a body through a coordinator.
pub async fn submit_json<R: Runner>(
    coordinator: &RequestCoordinator<R>,
    body: JoinRequestBody,
    synthesizer: &dyn BotIdentitySynthesizer,
) -> SubmitResponse {
    let result = match build_join_request(body, synthesizer, coordinator.config()) {
        Ok(request) => coordinator.submit(request).await,
        Err(err) => Err(err),
    };
    if let Err(err) = &result {
        tracing::warn!(error = %err, "join request rejected");
    }
    result.into()
}

/// Stop every live batch.
pub async fn terminate_all<R: Runner>(coordinator: &RequestCoordinator<R>) -> TerminateAllResponse {
    let report = coordinator.terminate_all().await;
    TerminateAllResponse {
        terminated_count: report.terminated_count,
        total_bots: report.total_bots,
        forced_count: report.forced_count,
    }
}

/// Live batches with the current load.
#[must_use]
pub fn list_active<R: Runner>(coordinator: &RequestCoordinator<R>) -> ActiveListResponse {
    let batches = coordinator.list_active();
    let total_bots = batches.iter().map(|b| b.bot_count).sum();
    ActiveListResponse {
        batches,
        total_bots,
        metrics: coordinator.metrics(),
    }
}

/// Return a health payload.
#[must_use]
pub fn health<R: Runner>(coordinator: &RequestCoordinator<R>) -> Health {
    let (active_batches, active_bots) = coordinator.registry().load();
    Health {
        ok: !coordinator.is_shutting_down(),
        active_batches,
        active_bots,
    }
}
