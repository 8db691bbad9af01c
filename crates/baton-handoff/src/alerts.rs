//! Repeated handoff failure tracking.
//!
//! The count is derived from the source session's own lifecycle events, so
//! a block survives restarts and needs no side table: consecutive
//! `CONTEXT_HANDOFF_FAILED` events since the last completed handoff or the
//! last manual clear. Cancelled runs do not count.

use baton_core::model::lifecycle::{
    CONTEXT_HANDOFF_COMPLETED, CONTEXT_HANDOFF_FAILED, HANDOFF_BLOCK_CLEARED, SYSTEM_ALERT,
};
use baton_core::model::{ActorRole, Channel, EventEnvelope, LedgerRecord, SessionId};
use baton_core::EventLedger;

use crate::error::{FailureReason, HandoffError};

pub const ALERT_CODE: &str = "REPEATED_HANDOFF_FAILURE";

/// Consecutive counted failures at the tail of a session.
pub fn consecutive_failures(records: &[LedgerRecord]) -> u32 {
    let mut count = 0;
    for record in records.iter().rev() {
        match record.event_type() {
            CONTEXT_HANDOFF_COMPLETED | HANDOFF_BLOCK_CLEARED => break,
            CONTEXT_HANDOFF_FAILED => {
                if record.envelope.payload_str("reason") != Some(FailureReason::Cancelled.as_str()) {
                    count += 1;
                }
            }
            _ => {}
        }
    }
    count
}

/// Refuse a new attempt on a blocked source session.
pub fn ensure_not_blocked(
    ledger: &EventLedger,
    source: &SessionId,
    ceiling: u32,
) -> Result<(), HandoffError> {
    let failures = consecutive_failures(&ledger.read_all(source)?);
    if ceiling > 0 && failures >= ceiling {
        return Err(HandoffError::RepeatedHandoffFailure {
            session_id: source.to_string(),
            failures,
        });
    }
    Ok(())
}

/// Called after a FAILED event was written. Emits the alert exactly when
/// the count reaches the ceiling; further attempts are refused from then
/// on, so the count cannot pass it and the alert is raised once.
pub fn after_failure(
    ledger: &EventLedger,
    source: &SessionId,
    ceiling: u32,
    reason: FailureReason,
) -> Result<bool, HandoffError> {
    let failures = consecutive_failures(&ledger.read_all(source)?);
    if ceiling == 0 || failures != ceiling {
        return Ok(false);
    }
    let alert = EventEnvelope::new(source.clone(), "handoff-coordinator", ActorRole::System, SYSTEM_ALERT)
        .with_channel(Channel::System)
        .with_field("code", ALERT_CODE)
        .with_field("consecutive_failures", failures)
        .with_field("last_reason", reason.as_str())
        .with_field(
            "message",
            format!("{failures} consecutive handoff failures; further transitions are blocked until cleared"),
        );
    ledger.append(alert)?;
    tracing::error!(
        session_id = %source,
        failures,
        last_reason = %reason,
        "Repeated handoff failure; session blocked"
    );
    Ok(true)
}

/// Manual override. Returns false when the session was not blocked.
pub fn clear_block(
    ledger: &EventLedger,
    source: &SessionId,
    ceiling: u32,
    cleared_by: &str,
) -> Result<bool, HandoffError> {
    let failures = consecutive_failures(&ledger.read_all(source)?);
    if ceiling == 0 || failures < ceiling {
        return Ok(false);
    }
    ledger.append(
        EventEnvelope::new(source.clone(), cleared_by, ActorRole::System, HANDOFF_BLOCK_CLEARED)
            .with_channel(Channel::System)
            .with_field("cleared_failures", failures),
    )?;
    tracing::info!(session_id = %source, failures, "Handoff block cleared");
    Ok(true)
}
