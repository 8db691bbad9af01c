//! Guarded context-window handoffs for the baton ledger.
//!
//! A [`HandoffCoordinator`] freezes a source session, distils its history
//! into an evidence-grounded [`HandoffPacket`](baton_core::model::HandoffPacket),
//! writes the packet to sequence 0 of a reserved target session and only
//! opens the target once every continuity probe passes. The
//! [`QualityGateEvaluator`] reads finished handoffs back from the ledger to
//! decide whether a rollout may widen.

pub mod alerts;
pub mod compress;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod gate;
pub mod probes;
pub mod prune;
pub mod rollout;
pub mod snapshot;
pub mod state;
pub mod trigger;
pub mod validate;

pub use coordinator::{
    handoff_id, HandoffCoordinator, HandoffOutcome, HandoffRequest, HandoffSummary,
};
pub use error::{FailureReason, HandoffError};
pub use export::{export_handoffs, ExportOptions, ExportRecord};
pub use gate::{GateCheck, GateReport, QualityGateEvaluator};
pub use probes::{CategoryProbe, ContinuityProbe, ContinuityProbeRunner, ProbeContext};
pub use rollout::{HandoffRecord, RolloutWindow, TerminalOutcome};
pub use state::HandoffState;
pub use trigger::TriggerReason;
pub use validate::{validate_packet, Violation};
