use serde::{Deserialize, Serialize};
use thiserror::Error;

use baton_core::error::CoreError;
use baton_query::QueryError;

use crate::state::HandoffState;

/// Machine-readable reason code carried by every `CONTEXT_HANDOFF_FAILED` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    ValidationError,
    ProbeFailure,
    CoverageShortfall,
    RepeatedHandoffFailure,
    Timeout,
    Cancelled,
    Busy,
    LedgerError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ValidationError => "VALIDATION_ERROR",
            FailureReason::ProbeFailure => "PROBE_FAILURE",
            FailureReason::CoverageShortfall => "COVERAGE_SHORTFALL",
            FailureReason::RepeatedHandoffFailure => "REPEATED_HANDOFF_FAILURE",
            FailureReason::Timeout => "TIMEOUT",
            FailureReason::Cancelled => "CANCELLED",
            FailureReason::Busy => "BUSY",
            FailureReason::LedgerError => "LEDGER_ERROR",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum HandoffError {
    #[error("Packet validation failed: {}", .violations.join("; "))]
    Validation { violations: Vec<String> },

    #[error("Continuity probes failed: {}", .failed.join(", "))]
    ProbeFailure { failed: Vec<String>, pass_rate: f64 },

    #[error(
        "Coverage shortfall after {attempts} attempt(s): coverage {coverage:.2} (min {min_coverage:.2}), \
         confidence {confidence:.2} (min {min_confidence:.2}), evidence budget {evidence_budget}"
    )]
    CoverageShortfall {
        coverage: f64,
        confidence: f64,
        min_coverage: f64,
        min_confidence: f64,
        attempts: u32,
        evidence_budget: usize,
    },

    #[error("Session {session_id} is blocked after {failures} consecutive failed handoffs; clear the block to retry")]
    RepeatedHandoffFailure { session_id: String, failures: u32 },

    #[error("Session {0} already has a handoff in flight")]
    Busy(String),

    #[error("Handoff timed out in state {state}")]
    Timeout { state: HandoffState },

    #[error("Handoff cancelled in state {state}")]
    Cancelled { state: HandoffState },

    #[error("Invalid handoff request: {0}")]
    InvalidRequest(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] CoreError),

    #[error("Analytics error: {0}")]
    Query(#[from] QueryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Handoff task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl HandoffError {
    pub fn reason(&self) -> FailureReason {
        match self {
            HandoffError::Validation { .. } | HandoffError::InvalidRequest(_) => {
                FailureReason::ValidationError
            }
            HandoffError::ProbeFailure { .. } => FailureReason::ProbeFailure,
            HandoffError::CoverageShortfall { .. } => FailureReason::CoverageShortfall,
            HandoffError::RepeatedHandoffFailure { .. } => FailureReason::RepeatedHandoffFailure,
            HandoffError::Busy(_) => FailureReason::Busy,
            HandoffError::Timeout { .. } => FailureReason::Timeout,
            HandoffError::Cancelled { .. } => FailureReason::Cancelled,
            HandoffError::Ledger(e) if e.is_validation() => FailureReason::ValidationError,
            HandoffError::Ledger(_)
            | HandoffError::Query(_)
            | HandoffError::Json(_)
            | HandoffError::Task(_) => FailureReason::LedgerError,
        }
    }
}
