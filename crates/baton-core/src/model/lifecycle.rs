//! Event type strings with fixed meaning across the workspace.

pub const CONTEXT_HANDOFF_STARTED: &str = "CONTEXT_HANDOFF_STARTED";
pub const CONTEXT_HANDOFF_PACKET_BUILT: &str = "CONTEXT_HANDOFF_PACKET_BUILT";
pub const CONTEXT_HANDOFF_VALIDATED: &str = "CONTEXT_HANDOFF_VALIDATED";
pub const CONTEXT_HANDOFF_BOOTSTRAPPED: &str = "CONTEXT_HANDOFF_BOOTSTRAPPED";
pub const CONTEXT_HANDOFF_FAILED: &str = "CONTEXT_HANDOFF_FAILED";
pub const CONTEXT_HANDOFF_COMPLETED: &str = "CONTEXT_HANDOFF_COMPLETED";

/// Lifecycle events in the order a successful transition emits them.
pub const LIFECYCLE_ORDER: [&str; 5] = [
    CONTEXT_HANDOFF_STARTED,
    CONTEXT_HANDOFF_PACKET_BUILT,
    CONTEXT_HANDOFF_VALIDATED,
    CONTEXT_HANDOFF_BOOTSTRAPPED,
    CONTEXT_HANDOFF_COMPLETED,
];

/// The packet record stored at sequence 0 of a target session.
pub const CONTEXT_HANDOFF_PACKET: &str = "CONTEXT_HANDOFF_PACKET";

/// Explicit agent request for a handoff.
pub const CONTEXT_HANDOFF_REQUESTED: &str = "CONTEXT_HANDOFF_REQUESTED";

/// Documents sequence numbers lost to an unreadable record.
pub const LEDGER_TOMBSTONE: &str = "LEDGER_TOMBSTONE";

pub const SYSTEM_ALERT: &str = "SYSTEM_ALERT";

/// Manual override that lifts a repeated-failure block on a source session.
pub const HANDOFF_BLOCK_CLEARED: &str = "HANDOFF_BLOCK_CLEARED";

/// True for the six lifecycle event types the coordinator writes to a source session.
pub fn is_handoff_lifecycle(event_type: &str) -> bool {
    event_type == CONTEXT_HANDOFF_FAILED || LIFECYCLE_ORDER.contains(&event_type)
}
