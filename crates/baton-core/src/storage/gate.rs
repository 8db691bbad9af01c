use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{ActorRole, SessionId};

/// Admission state of a session. Held in process; a reopened ledger rebuilds
/// it from the handoff lifecycle records it finds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionGate {
    #[default]
    Open,
    /// Source of an in-flight handoff.
    Frozen { handoff_id: String },
    /// Target of an in-flight handoff, waiting for its packet at sequence 0.
    Reserved { handoff_id: String },
    /// Packet written, continuity probes not yet passed.
    AwaitingVerification { handoff_id: String },
    /// Continuity could not be verified; agents may not resume.
    ResumeBlocked { handoff_id: String, reason: String },
    /// Source of a completed handoff; work continues in `target`.
    Retired { handoff_id: String, target: SessionId },
}

impl SessionGate {
    /// Whether an append authored by `role` may land on `session_id`.
    pub(crate) fn admit(&self, session_id: &SessionId, role: ActorRole) -> Result<(), CoreError> {
        match self {
            SessionGate::Open => Ok(()),
            SessionGate::Reserved { handoff_id } => Err(CoreError::SessionReserved {
                session_id: session_id.to_string(),
                handoff_id: handoff_id.clone(),
            }),
            _ if role.is_infrastructure() => Ok(()),
            SessionGate::Frozen { handoff_id } | SessionGate::Retired { handoff_id, .. } => {
                Err(CoreError::SessionFrozen {
                    session_id: session_id.to_string(),
                    handoff_id: handoff_id.clone(),
                })
            }
            SessionGate::AwaitingVerification { handoff_id } => Err(CoreError::ResumeBlocked {
                session_id: session_id.to_string(),
                reason: format!("awaiting continuity verification for handoff {handoff_id}"),
            }),
            SessionGate::ResumeBlocked { reason, .. } => Err(CoreError::ResumeBlocked {
                session_id: session_id.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, SessionGate::Open)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionGate::Open => "open",
            SessionGate::Frozen { .. } => "frozen",
            SessionGate::Reserved { .. } => "reserved",
            SessionGate::AwaitingVerification { .. } => "awaiting_verification",
            SessionGate::ResumeBlocked { .. } => "resume_blocked",
            SessionGate::Retired { .. } => "retired",
        }
    }
}
