pub mod event;
pub mod handoff;
pub mod lifecycle;
pub mod severity;

pub use event::{ActorRole, Channel, EventEnvelope, EventId, LedgerRecord, SessionId, SCHEMA_VERSION};
pub use handoff::{
    probe_pass_rate, ArtifactRef, DecisionEntry, HandoffPacket, OpenThread, ProbeCategory,
    ProbeResult, RiskEntry,
};
pub use severity::Severity;
