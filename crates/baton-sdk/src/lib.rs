//! Fluent Rust SDK for recording agent work into a baton ledger.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use baton_sdk::{ActorRole, EventLedger, SessionRecorder, Severity};
//!
//! let ledger = Arc::new(EventLedger::open_dir(".baton".as_ref(), Default::default()).unwrap());
//! let mut lead = SessionRecorder::begin(ledger, "sess-42", "lead-1", ActorRole::Lead);
//! lead.mission("Migrate billing to the invoice service").unwrap();
//! let api = lead.open_thread("t-api", "Invoice API contract").unwrap();
//! lead.decision("Dual-write during migration", "Allows rollback", &[api]).unwrap();
//! lead.risk("r-drift", "Totals drift between systems", Severity::High, None).unwrap();
//! lead.usage(1500, 800, Some(0.02)).request_handoff("context nearly full").unwrap();
//! ```

mod recorder;

pub use recorder::{RecorderTotals, SessionRecorder, MESSAGE};

// Re-export core types that SDK users need
pub use baton_core::config::HandoffVocabulary;
pub use baton_core::model::{ActorRole, Channel, EventEnvelope, EventId, SessionId, Severity};
pub use baton_core::{CoreError, EventLedger};
