use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{lifecycle, LedgerRecord, SessionId};

pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Parameters of a paginated replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayQuery {
    /// Start strictly after this event; `None` replays from the beginning.
    pub since_event_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
    /// Return payloads unredacted. Requires `ledger.allow_raw_reads`.
    pub raw: bool,
}

impl Default for ReplayQuery {
    fn default() -> Self {
        Self {
            since_event_id: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
            raw: false,
        }
    }
}

/// One page of a session replay, with its ordering guarantees spelled out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayPage {
    pub session_id: SessionId,
    pub since_event_id: Option<String>,
    pub offset: usize,
    pub limit: usize,
    /// Offset of the next page, `None` at the end.
    pub next_offset: Option<usize>,
    pub total_after_since: usize,
    pub events: Vec<LedgerRecord>,
    pub ordered: bool,
    pub gap_free: bool,
    pub deterministic: bool,
    pub raw: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub count: usize,
    pub first_ts: Option<DateTime<Utc>>,
    pub last_ts: Option<DateTime<Utc>>,
    /// Distinct actor ids, sorted.
    pub actors: Vec<String>,
    /// Distinct channels, sorted.
    pub channels: Vec<String>,
}

impl SessionSummary {
    pub fn from_records(session_id: &SessionId, records: &[LedgerRecord]) -> Self {
        let actors: BTreeSet<&str> = records
            .iter()
            .map(|r| r.envelope.actor_id.as_str())
            .collect();
        let channels: BTreeSet<&str> = records
            .iter()
            .map(|r| r.envelope.channel.as_str())
            .collect();
        Self {
            session_id: session_id.clone(),
            count: records.len(),
            first_ts: records.iter().map(|r| r.envelope.timestamp_utc).min(),
            last_ts: records.iter().map(|r| r.envelope.timestamp_utc).max(),
            actors: actors.into_iter().map(String::from).collect(),
            channels: channels.into_iter().map(String::from).collect(),
        }
    }
}

/// Result of checking a session's sequence numbering.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContiguityReport {
    /// Strictly increasing sequence values.
    pub ordered: bool,
    /// Every gap is documented by a tombstone.
    pub gap_free: bool,
    pub missing: Vec<u64>,
    pub documented: Vec<u64>,
}

impl ContiguityReport {
    pub fn undocumented(&self) -> Vec<u64> {
        let documented: BTreeSet<u64> = self.documented.iter().copied().collect();
        self.missing
            .iter()
            .copied()
            .filter(|s| !documented.contains(s))
            .collect()
    }
}

/// Check that `records` (a full session, sequence order) is strictly
/// increasing from 0 with every gap covered by a `LEDGER_TOMBSTONE`.
pub fn verify_contiguity(records: &[LedgerRecord]) -> ContiguityReport {
    let ordered = records.windows(2).all(|w| w[0].sequence < w[1].sequence);

    let mut missing = Vec::new();
    let mut expected = 0u64;
    for record in records {
        while expected < record.sequence {
            missing.push(expected);
            expected += 1;
        }
        expected = record.sequence.saturating_add(1);
    }

    let documented: BTreeSet<u64> = records
        .iter()
        .filter(|r| r.envelope.event_type == lifecycle::LEDGER_TOMBSTONE)
        .flat_map(|r| tombstone_sequences(r))
        .collect();
    let gap_free = missing.iter().all(|s| documented.contains(s));

    ContiguityReport {
        ordered,
        gap_free,
        missing,
        documented: documented.into_iter().collect(),
    }
}

/// Sequences a tombstone record documents as lost.
pub fn tombstone_sequences(record: &LedgerRecord) -> Vec<u64> {
    record
        .envelope
        .payload
        .get("missing_sequences")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|v| v.as_u64()).collect())
        .unwrap_or_default()
}
