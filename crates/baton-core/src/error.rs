use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation failed for `{field}`: {reason}")]
    Validation { field: String, reason: String },

    #[error("Event not found: {id}")]
    NotFound { id: String },

    #[error("Session {session_id} is frozen for handoff {handoff_id}; only system and audit events are admitted")]
    SessionFrozen {
        session_id: String,
        handoff_id: String,
    },

    #[error("Session {session_id} is reserved for handoff {handoff_id}")]
    SessionReserved {
        session_id: String,
        handoff_id: String,
    },

    #[error("Resume blocked on session {session_id}: {reason}")]
    ResumeBlocked { session_id: String, reason: String },

    #[error("Sequence slot {sequence} of session {session_id} is already occupied")]
    SlotOccupied { session_id: String, sequence: u64 },

    #[error("Raw payload reads are disabled by configuration")]
    RawReadsDisabled,

    #[error("Corrupt ledger record in {path} at line {line}: {reason}")]
    Corrupt {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that reject a malformed envelope or packet.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
