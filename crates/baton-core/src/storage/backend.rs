use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::CoreError;
use crate::model::{LedgerRecord, SessionId};

/// Everything a backend recovered for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionLoad {
    /// Readable records, sorted by sequence.
    pub records: Vec<LedgerRecord>,
    /// Sequences below the highest readable one that could not be recovered.
    pub missing_sequences: Vec<u64>,
}

/// The ordered, durable substrate under the ledger.
///
/// `persist` must not return before the record is durable. The ledger
/// serializes calls per session, so implementations only need to be safe
/// across sessions.
pub trait LedgerBackend: Send + Sync {
    /// Load every persisted session.
    fn load(&self) -> Result<BTreeMap<SessionId, SessionLoad>, CoreError>;

    /// Durably persist one record.
    fn persist(&self, record: &LedgerRecord) -> Result<(), CoreError>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// In-process backend. Cloned handles are not shared; keep one instance
/// around to simulate a restart with [`crate::EventLedger::open`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    sessions: Mutex<BTreeMap<SessionId, Vec<LedgerRecord>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerBackend for MemoryBackend {
    fn load(&self) -> Result<BTreeMap<SessionId, SessionLoad>, CoreError> {
        let sessions = self.sessions.lock();
        Ok(sessions
            .iter()
            .map(|(id, records)| {
                let mut records = records.clone();
                records.sort_by_key(|r| r.sequence);
                let missing = missing_sequences(&records);
                (
                    id.clone(),
                    SessionLoad {
                        records,
                        missing_sequences: missing,
                    },
                )
            })
            .collect())
    }

    fn persist(&self, record: &LedgerRecord) -> Result<(), CoreError> {
        self.sessions
            .lock()
            .entry(record.envelope.session_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Sequences in `0..=max` absent from a sorted record list.
pub(crate) fn missing_sequences(records: &[LedgerRecord]) -> Vec<u64> {
    let mut missing = Vec::new();
    let mut expected = 0u64;
    for record in records {
        while expected < record.sequence {
            missing.push(expected);
            expected += 1;
        }
        expected = record.sequence + 1;
    }
    missing
}
