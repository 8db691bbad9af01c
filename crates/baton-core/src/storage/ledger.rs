use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::json;

use crate::config::LedgerSettings;
use crate::error::CoreError;
use crate::model::{lifecycle, ActorRole, Channel, EventEnvelope, EventId, LedgerRecord, SessionId};
use crate::redact::redact_payload;

use super::backend::LedgerBackend;
use super::file::FileBackend;
use super::gate::SessionGate;
use super::read::{
    verify_contiguity, ContiguityReport, ReplayPage, ReplayQuery, SessionSummary, MAX_PAGE_LIMIT,
};

const TOMBSTONE_ACTOR: &str = "ledger";

#[derive(Debug, Default)]
struct SessionLog {
    /// Sorted by sequence.
    records: Vec<LedgerRecord>,
    gate: SessionGate,
    last_active: u64,
    /// Lowest sequence the next append may take; past any lost tail.
    sequence_floor: u64,
}

impl SessionLog {
    fn next_sequence(&self) -> u64 {
        self.records
            .last()
            .map_or(0, |r| r.sequence + 1)
            .max(self.sequence_floor)
    }

    /// Sequences past the last readable record that the backend reported lost.
    fn lost_tail(&self) -> std::ops::Range<u64> {
        self.records.last().map_or(0, |r| r.sequence + 1)..self.sequence_floor
    }
}

/// Durable, append-only, per-session ordered store of events.
///
/// Appends to one session are serialized by that session's mutex; appends
/// to different sessions only share the brief event-id index update.
/// Lock order is always session, then index.
pub struct EventLedger {
    backend: Box<dyn LedgerBackend>,
    settings: LedgerSettings,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionLog>>>>,
    /// event id -> (session, sequence)
    index: RwLock<HashMap<EventId, (SessionId, u64)>>,
    activity: AtomicU64,
}

impl std::fmt::Debug for EventLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLedger")
            .field("backend", &self.backend.describe())
            .field("sessions", &self.sessions.read().len())
            .finish()
    }
}

impl EventLedger {
    /// Open a ledger over `backend`, rebuilding the index and documenting
    /// any unrecoverable sequence gaps with a tombstone.
    pub fn open(backend: Box<dyn LedgerBackend>, settings: LedgerSettings) -> Result<Self, CoreError> {
        let loaded = backend.load()?;

        let mut ordered: Vec<_> = loaded.into_iter().collect();
        ordered.sort_by(|(a_id, a), (b_id, b)| {
            let a_last = a.records.iter().map(|r| r.envelope.timestamp_utc).max();
            let b_last = b.records.iter().map(|r| r.envelope.timestamp_utc).max();
            a_last.cmp(&b_last).then_with(|| a_id.cmp(b_id))
        });

        let mut sessions = HashMap::new();
        let mut index = HashMap::new();
        let mut tick = 0u64;
        for (session_id, load) in ordered {
            tick += 1;
            for record in &load.records {
                let key = record.envelope.event_id.clone();
                if index.contains_key(&key) {
                    tracing::warn!(
                        session_id = %session_id,
                        sequence = record.sequence,
                        "Duplicate event id {key} in ledger; keeping the first occurrence"
                    );
                    continue;
                }
                index.insert(key, (session_id.clone(), record.sequence));
            }
            let sequence_floor = load.missing_sequences.iter().max().map_or(0, |s| s + 1);
            let log = SessionLog {
                records: load.records,
                gate: SessionGate::Open,
                last_active: tick,
                sequence_floor,
            };
            sessions.insert(session_id, Arc::new(Mutex::new(log)));
        }

        let ledger = Self {
            backend,
            settings,
            sessions: RwLock::new(sessions),
            index: RwLock::new(index),
            activity: AtomicU64::new(tick),
        };
        tracing::info!(
            backend = %ledger.backend.describe(),
            sessions = ledger.sessions.read().len(),
            "Opened event ledger"
        );
        ledger.document_gaps()?;
        ledger.restore_gates();
        Ok(ledger)
    }

    /// Open (creating if needed) a file-backed ledger in `dir`.
    pub fn open_dir(dir: &Path, settings: LedgerSettings) -> Result<Self, CoreError> {
        Self::open(Box::new(FileBackend::open(dir)?), settings)
    }

    /// In-memory ledger with default settings.
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(super::backend::MemoryBackend::new()),
            settings: LedgerSettings::default(),
            sessions: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            activity: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    fn document_gaps(&self) -> Result<(), CoreError> {
        let ids: Vec<SessionId> = self.sessions.read().keys().cloned().collect();
        for session_id in ids {
            let mut undocumented = verify_contiguity(&self.read_all(&session_id)?).undocumented();
            if let Some(log) = self.session(&session_id) {
                undocumented.extend(log.lock().lost_tail());
            }
            if undocumented.is_empty() {
                continue;
            }
            tracing::warn!(
                session_id = %session_id,
                missing = ?undocumented,
                "Documenting unrecoverable ledger records with a tombstone"
            );
            let tombstone = EventEnvelope::new(
                session_id.clone(),
                TOMBSTONE_ACTOR,
                ActorRole::System,
                lifecycle::LEDGER_TOMBSTONE,
            )
            .with_channel(Channel::System)
            .with_field("missing_sequences", json!(undocumented))
            .with_field("reason", "unreadable record");
            self.append(tombstone)?;
        }
        Ok(())
    }

    /// Re-derive handoff gates from lifecycle records, so a reopened ledger
    /// keeps retired sources closed and unverified targets blocked. Runs
    /// that never reached a terminal event leave their source open.
    fn restore_gates(&self) {
        let sessions = self.sessions.read();
        // handoff id -> failure detail (None when completed)
        let mut outcomes: HashMap<String, Option<String>> = HashMap::new();
        let mut retired = Vec::new();
        for (session_id, log) in sessions.iter() {
            for record in &log.lock().records {
                let Some(handoff_id) = record.envelope.payload_str("handoff_id") else {
                    continue;
                };
                match record.event_type() {
                    lifecycle::CONTEXT_HANDOFF_COMPLETED => {
                        outcomes.insert(handoff_id.to_string(), None);
                        if let Some(target) = record.envelope.payload_str("target_session_id") {
                            retired.push((session_id.clone(), handoff_id.to_string(), SessionId::from(target)));
                        }
                    }
                    lifecycle::CONTEXT_HANDOFF_FAILED => {
                        let detail = record
                            .envelope
                            .payload_str("detail")
                            .unwrap_or("handoff failed after bootstrap");
                        outcomes.insert(handoff_id.to_string(), Some(detail.to_string()));
                    }
                    _ => {}
                }
            }
        }

        for (session_id, log) in sessions.iter() {
            let mut log = log.lock();
            let Some(head) = log.records.first() else {
                continue;
            };
            if head.sequence != 0 || head.event_type() != lifecycle::CONTEXT_HANDOFF_PACKET {
                continue;
            }
            let Some(handoff_id) = head.envelope.payload_str("handoff_id").map(str::to_string) else {
                continue;
            };
            log.gate = match outcomes.get(&handoff_id) {
                Some(None) => SessionGate::Open,
                Some(Some(reason)) => SessionGate::ResumeBlocked {
                    handoff_id,
                    reason: reason.clone(),
                },
                None => SessionGate::AwaitingVerification { handoff_id },
            };
            if !log.gate.is_open() {
                tracing::info!(session_id = %session_id, gate = log.gate.label(), "Restored session gate");
            }
        }

        for (session_id, handoff_id, target) in retired {
            if let Some(log) = sessions.get(&session_id) {
                log.lock().gate = SessionGate::Retired { handoff_id, target };
            }
        }
    }

    fn session(&self, session_id: &SessionId) -> Option<Arc<Mutex<SessionLog>>> {
        self.sessions.read().get(session_id).cloned()
    }

    fn session_or_create(&self, session_id: &SessionId) -> Arc<Mutex<SessionLog>> {
        if let Some(log) = self.session(session_id) {
            return log;
        }
        self.sessions
            .write()
            .entry(session_id.clone())
            .or_default()
            .clone()
    }

    fn existing(&self, session_id: &SessionId) -> Result<Arc<Mutex<SessionLog>>, CoreError> {
        self.session(session_id).ok_or_else(|| CoreError::NotFound {
            id: session_id.to_string(),
        })
    }

    fn touch(&self, log: &mut SessionLog) {
        log.last_active = self.activity.fetch_add(1, Ordering::Relaxed) + 1;
    }

    /// Validate, admit and durably append one event. Returns its sequence.
    pub fn append(&self, envelope: EventEnvelope) -> Result<u64, CoreError> {
        envelope.validate()?;
        let log = self.session_or_create(&envelope.session_id);
        let mut log = log.lock();
        log.gate.admit(&envelope.session_id, envelope.actor_role)?;
        let sequence = log.next_sequence();
        self.write_locked(&mut log, envelope, sequence)
    }

    /// Write the handoff packet record at sequence 0 of a reserved target
    /// and move the target to `AwaitingVerification`.
    pub fn bootstrap(
        &self,
        target: &SessionId,
        handoff_id: &str,
        envelope: EventEnvelope,
    ) -> Result<u64, CoreError> {
        envelope.validate()?;
        if &envelope.session_id != target {
            return Err(CoreError::validation(
                "session_id",
                format!("bootstrap record belongs to {}, not {target}", envelope.session_id),
            ));
        }
        let log = self.existing(target)?;
        let mut log = log.lock();
        match &log.gate {
            SessionGate::Reserved { handoff_id: held } if held == handoff_id => {}
            other => {
                return Err(CoreError::validation(
                    "session_id",
                    format!("{target} is {} and not reserved for {handoff_id}", other.label()),
                ))
            }
        }
        if !log.records.is_empty() {
            return Err(CoreError::SlotOccupied {
                session_id: target.to_string(),
                sequence: 0,
            });
        }
        let sequence = self.write_locked(&mut log, envelope, 0)?;
        log.gate = SessionGate::AwaitingVerification {
            handoff_id: handoff_id.to_string(),
        };
        Ok(sequence)
    }

    fn write_locked(
        &self,
        log: &mut SessionLog,
        envelope: EventEnvelope,
        sequence: u64,
    ) -> Result<u64, CoreError> {
        let event_id = envelope.event_id.clone();
        {
            let mut index = self.index.write();
            if let Some(parent) = &envelope.parent_event_id {
                if !index.contains_key(parent) {
                    return Err(CoreError::validation(
                        "parent_event_id",
                        format!("parent {parent} is not in the ledger"),
                    ));
                }
            }
            if index.contains_key(&event_id) {
                return Err(CoreError::validation(
                    "event_id",
                    format!("{event_id} already exists"),
                ));
            }
            index.insert(event_id.clone(), (envelope.session_id.clone(), sequence));
        }

        let record = LedgerRecord { sequence, envelope };
        if let Err(e) = self.backend.persist(&record) {
            self.index.write().remove(&event_id);
            tracing::error!(
                session_id = %record.envelope.session_id,
                sequence,
                "Ledger persist failed: {e}"
            );
            return Err(e);
        }

        tracing::debug!(
            session_id = %record.envelope.session_id,
            sequence,
            event_type = %record.envelope.event_type,
            "Appended event"
        );
        log.records.push(record);
        self.touch(log);
        Ok(sequence)
    }

    /// Records with `sequence >= since_sequence`, at most `limit`, in
    /// sequence order. Payloads are returned as stored.
    pub fn read(
        &self,
        session_id: &SessionId,
        since_sequence: u64,
        limit: usize,
    ) -> Result<Vec<LedgerRecord>, CoreError> {
        let log = self.existing(session_id)?;
        let log = log.lock();
        let start = log.records.partition_point(|r| r.sequence < since_sequence);
        Ok(log.records[start..].iter().take(limit).cloned().collect())
    }

    pub fn read_all(&self, session_id: &SessionId) -> Result<Vec<LedgerRecord>, CoreError> {
        self.read(session_id, 0, usize::MAX)
    }

    /// Paginated replay for external readers, redacted unless `raw`.
    pub fn replay(&self, session_id: &SessionId, query: &ReplayQuery) -> Result<ReplayPage, CoreError> {
        if query.raw && !self.settings.allow_raw_reads {
            return Err(CoreError::RawReadsDisabled);
        }
        let records = self.read_all(session_id)?;
        let contiguity = verify_contiguity(&records);

        let start = match &query.since_event_id {
            None => 0,
            Some(since) => {
                records
                    .iter()
                    .position(|r| r.envelope.event_id.as_str() == since)
                    .ok_or_else(|| CoreError::NotFound { id: since.clone() })?
                    + 1
            }
        };
        let after = &records[start..];
        let limit = query.limit.clamp(1, MAX_PAGE_LIMIT);
        let offset = query.offset.min(after.len());
        let end = offset.saturating_add(limit).min(after.len());

        let redact = self.settings.redact_payloads && !query.raw;
        let events = after[offset..end]
            .iter()
            .map(|r| {
                let mut r = r.clone();
                if redact {
                    r.envelope.payload = redact_payload(&r.envelope.payload);
                }
                r
            })
            .collect();

        Ok(ReplayPage {
            session_id: session_id.clone(),
            since_event_id: query.since_event_id.clone(),
            offset,
            limit,
            next_offset: (end < after.len()).then_some(end),
            total_after_since: after.len(),
            events,
            ordered: contiguity.ordered,
            gap_free: contiguity.gap_free,
            deterministic: true,
            raw: query.raw,
        })
    }

    pub fn summary(&self, session_id: &SessionId) -> Result<SessionSummary, CoreError> {
        let records = self.read_all(session_id)?;
        Ok(SessionSummary::from_records(session_id, &records))
    }

    /// Non-empty sessions, most recently active first.
    pub fn list_sessions(&self, limit: usize) -> Vec<SessionId> {
        let mut active: Vec<(u64, SessionId)> = self
            .sessions
            .read()
            .iter()
            .filter_map(|(id, log)| {
                let log = log.lock();
                (!log.records.is_empty()).then(|| (log.last_active, id.clone()))
            })
            .collect();
        active.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        active.into_iter().take(limit).map(|(_, id)| id).collect()
    }

    /// Look up one event by id.
    pub fn event(&self, event_id: &str) -> Result<LedgerRecord, CoreError> {
        let not_found = || CoreError::NotFound {
            id: event_id.to_string(),
        };
        let (session_id, sequence) = self.index.read().get(event_id).cloned().ok_or_else(not_found)?;
        let log = self.existing(&session_id)?;
        let log = log.lock();
        let pos = log
            .records
            .binary_search_by_key(&sequence, |r| r.sequence)
            .map_err(|_| not_found())?;
        Ok(log.records[pos].clone())
    }

    pub fn contains_event(&self, event_id: &str) -> bool {
        self.index.read().contains_key(event_id)
    }

    /// The event followed by its parents, nearest first, at most `max_depth` records.
    pub fn ancestry(&self, event_id: &str, max_depth: usize) -> Result<Vec<LedgerRecord>, CoreError> {
        let mut chain = Vec::new();
        let mut next = Some(EventId::from(event_id));
        while let Some(id) = next {
            if chain.len() >= max_depth {
                break;
            }
            let record = self.event(id.as_str())?;
            next = record.envelope.parent_event_id.clone();
            chain.push(record);
        }
        Ok(chain)
    }

    pub fn next_sequence(&self, session_id: &SessionId) -> u64 {
        self.session(session_id)
            .map_or(0, |log| log.lock().next_sequence())
    }

    pub fn session_len(&self, session_id: &SessionId) -> usize {
        self.session(session_id).map_or(0, |log| log.lock().records.len())
    }

    pub fn contiguity(&self, session_id: &SessionId) -> Result<ContiguityReport, CoreError> {
        Ok(verify_contiguity(&self.read_all(session_id)?))
    }

    pub fn gate(&self, session_id: &SessionId) -> SessionGate {
        self.session(session_id)
            .map(|log| log.lock().gate.clone())
            .unwrap_or_default()
    }

    /// Stop admitting agent-authored events on `session_id`.
    pub fn freeze(&self, session_id: &SessionId, handoff_id: &str) -> Result<(), CoreError> {
        let log = self.existing(session_id)?;
        let mut log = log.lock();
        log.gate.admit(session_id, ActorRole::Lead)?;
        log.gate = SessionGate::Frozen {
            handoff_id: handoff_id.to_string(),
        };
        tracing::info!(session_id = %session_id, handoff_id, "Session frozen");
        Ok(())
    }

    /// Undo `freeze`. Returns false when the session is not frozen by `handoff_id`.
    pub fn thaw(&self, session_id: &SessionId, handoff_id: &str) -> bool {
        self.transition(session_id, |gate| match gate {
            SessionGate::Frozen { handoff_id: held } if held == handoff_id => Some(SessionGate::Open),
            _ => None,
        })
    }

    /// Claim an empty target session so nothing but the packet can land at sequence 0.
    pub fn reserve(&self, session_id: &SessionId, handoff_id: &str) -> Result<(), CoreError> {
        let log = self.session_or_create(session_id);
        let mut log = log.lock();
        if let Some(first) = log.records.first() {
            return Err(CoreError::SlotOccupied {
                session_id: session_id.to_string(),
                sequence: first.sequence,
            });
        }
        log.gate.admit(session_id, ActorRole::Lead)?;
        log.gate = SessionGate::Reserved {
            handoff_id: handoff_id.to_string(),
        };
        Ok(())
    }

    pub fn release(&self, session_id: &SessionId, handoff_id: &str) -> bool {
        self.transition(session_id, |gate| match gate {
            SessionGate::Reserved { handoff_id: held } if held == handoff_id => Some(SessionGate::Open),
            _ => None,
        })
    }

    /// Let agents resume on a verified target.
    pub fn open_for_resume(&self, session_id: &SessionId, handoff_id: &str) -> bool {
        self.transition(session_id, |gate| match gate {
            SessionGate::AwaitingVerification { handoff_id: held } if held == handoff_id => {
                Some(SessionGate::Open)
            }
            _ => None,
        })
    }

    pub fn block_resume(&self, session_id: &SessionId, handoff_id: &str, reason: &str) -> bool {
        let blocked = self.transition(session_id, |gate| match gate {
            SessionGate::AwaitingVerification { handoff_id: held } if held == handoff_id => {
                Some(SessionGate::ResumeBlocked {
                    handoff_id: handoff_id.to_string(),
                    reason: reason.to_string(),
                })
            }
            _ => None,
        });
        if blocked {
            tracing::warn!(session_id = %session_id, handoff_id, reason, "Resume blocked");
        }
        blocked
    }

    /// Manual override after a blocked resume has been reviewed.
    pub fn clear_resume_block(&self, session_id: &SessionId) -> bool {
        self.transition(session_id, |gate| match gate {
            SessionGate::ResumeBlocked { .. } => Some(SessionGate::Open),
            _ => None,
        })
    }

    /// Mark a source session as superseded by `target`.
    pub fn retire(&self, session_id: &SessionId, handoff_id: &str, target: &SessionId) -> bool {
        self.transition(session_id, |gate| match gate {
            SessionGate::Frozen { handoff_id: held } if held == handoff_id => Some(SessionGate::Retired {
                handoff_id: handoff_id.to_string(),
                target: target.clone(),
            }),
            _ => None,
        })
    }

    fn transition(
        &self,
        session_id: &SessionId,
        f: impl FnOnce(&SessionGate) -> Option<SessionGate>,
    ) -> bool {
        let Some(log) = self.session(session_id) else {
            return false;
        };
        let mut log = log.lock();
        match f(&log.gate) {
            Some(next) => {
                tracing::debug!(
                    session_id = %session_id,
                    from = log.gate.label(),
                    to = next.label(),
                    "Session gate changed"
                );
                log.gate = next;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::MemoryBackend;
    use crate::storage::read::tombstone_sequences;
    use std::collections::BTreeMap;
    use std::fs::OpenOptions;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn env(session: &str, event_type: &str) -> EventEnvelope {
        EventEnvelope::new(session.into(), "dev-1", ActorRole::Worker, event_type)
    }

    #[test]
    fn test_sequences_start_at_zero_per_session() {
        let ledger = EventLedger::in_memory();
        assert_eq!(ledger.append(env("a", "PLAN")).unwrap(), 0);
        assert_eq!(ledger.append(env("a", "CODE")).unwrap(), 1);
        assert_eq!(ledger.append(env("b", "PLAN")).unwrap(), 0);
        let read = ledger.read(&"a".into(), 0, 10).unwrap();
        assert_eq!(read.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(ledger.read(&"a".into(), 1, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_envelopes_are_not_persisted() {
        let ledger = EventLedger::in_memory();
        let mut bad = env("a", "PLAN");
        bad.actor_id.clear();
        assert!(ledger.append(bad).unwrap_err().is_validation());

        let orphan = env("a", "PLAN").with_parent(Some("evt_missing".into()));
        assert!(ledger.append(orphan).unwrap_err().is_validation());

        let first = env("a", "PLAN");
        let dup = env("b", "PLAN").with_id(first.event_id.clone());
        ledger.append(first).unwrap();
        assert!(ledger.append(dup).unwrap_err().is_validation());
        assert_eq!(ledger.session_len(&"a".into()), 1);
        assert_eq!(ledger.session_len(&"b".into()), 0);
    }

    #[test]
    fn test_concurrent_appends_are_gap_free() {
        let ledger = EventLedger::in_memory();
        std::thread::scope(|scope| {
            for t in 0..8 {
                let ledger = &ledger;
                scope.spawn(move || {
                    for i in 0..50 {
                        let session = if i % 2 == 0 { "shared" } else { "other" };
                        ledger
                            .append(env(session, &format!("STEP_{t}")))
                            .unwrap();
                    }
                });
            }
        });
        let records = ledger.read_all(&"shared".into()).unwrap();
        assert_eq!(records.len(), 200);
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.sequence, i as u64);
        }
        let report = ledger.contiguity(&"shared".into()).unwrap();
        assert!(report.ordered && report.gap_free);
    }

    #[test]
    fn test_replay_is_deterministic_and_paginated() {
        let ledger = EventLedger::in_memory();
        let mut ids = Vec::new();
        for i in 0..5 {
            let e = env("a", "STEP").with_field("i", i);
            ids.push(e.event_id.clone());
            ledger.append(e).unwrap();
        }
        let query = ReplayQuery {
            since_event_id: Some(ids[0].to_string()),
            limit: 3,
            offset: 0,
            raw: false,
        };
        let page = ledger.replay(&"a".into(), &query).unwrap();
        assert_eq!(page.total_after_since, 4);
        assert_eq!(page.events.len(), 3);
        assert_eq!(page.next_offset, Some(3));
        assert!(page.ordered && page.gap_free && page.deterministic);

        let again = ledger.replay(&"a".into(), &query).unwrap();
        assert_eq!(
            serde_json::to_vec(&page).unwrap(),
            serde_json::to_vec(&again).unwrap()
        );

        let last = ledger
            .replay(&"a".into(), &ReplayQuery { offset: 3, ..query.clone() })
            .unwrap();
        assert_eq!(last.events.len(), 1);
        assert_eq!(last.next_offset, None);

        let missing = ReplayQuery {
            since_event_id: Some("evt_nope".into()),
            ..ReplayQuery::default()
        };
        assert!(matches!(
            ledger.replay(&"a".into(), &missing),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_replay_redacts_unless_raw_allowed() {
        let ledger = EventLedger::in_memory();
        ledger
            .append(env("a", "TOOL_CALL").with_field("api_key", "sk-abcdefghijklmnopq"))
            .unwrap();
        let page = ledger.replay(&"a".into(), &ReplayQuery::default()).unwrap();
        assert_eq!(page.events[0].envelope.payload_str("api_key"), Some("[REDACTED]"));

        let raw = ReplayQuery {
            raw: true,
            ..ReplayQuery::default()
        };
        assert!(matches!(
            ledger.replay(&"a".into(), &raw),
            Err(CoreError::RawReadsDisabled)
        ));

        let settings = LedgerSettings {
            allow_raw_reads: true,
            ..LedgerSettings::default()
        };
        let ledger = EventLedger::open(Box::new(MemoryBackend::new()), settings).unwrap();
        ledger
            .append(env("a", "TOOL_CALL").with_field("api_key", "sk-abcdefghijklmnopq"))
            .unwrap();
        let page = ledger.replay(&"a".into(), &raw).unwrap();
        assert_eq!(
            page.events[0].envelope.payload_str("api_key"),
            Some("sk-abcdefghijklmnopq")
        );
    }

    #[test]
    fn test_list_sessions_most_recent_first() {
        let ledger = EventLedger::in_memory();
        ledger.append(env("a", "X")).unwrap();
        ledger.append(env("b", "X")).unwrap();
        ledger.append(env("c", "X")).unwrap();
        ledger.append(env("a", "Y")).unwrap();
        let ids: Vec<String> = ledger.list_sessions(10).into_iter().map(|s| s.0).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert_eq!(ledger.list_sessions(1).len(), 1);
    }

    #[test]
    fn test_event_index_and_ancestry() {
        let ledger = EventLedger::in_memory();
        let root = env("a", "PLAN");
        let child = env("a", "CODE").with_parent(Some(root.event_id.clone()));
        let grandchild = env("b", "REVIEW").with_parent(Some(child.event_id.clone()));
        let (root_id, gc_id) = (root.event_id.clone(), grandchild.event_id.clone());
        ledger.append(root).unwrap();
        ledger.append(child).unwrap();
        ledger.append(grandchild).unwrap();

        assert_eq!(ledger.event(gc_id.as_str()).unwrap().event_type(), "REVIEW");
        let chain = ledger.ancestry(gc_id.as_str(), 10).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[2].event_id(), &root_id);
        assert_eq!(ledger.ancestry(gc_id.as_str(), 2).unwrap().len(), 2);
        assert!(ledger.event("evt_missing").is_err());
    }

    #[test]
    fn test_freeze_admits_only_infrastructure() {
        let ledger = EventLedger::in_memory();
        ledger.append(env("src", "PLAN")).unwrap();
        ledger.freeze(&"src".into(), "h1").unwrap();
        assert!(matches!(
            ledger.append(env("src", "CODE")),
            Err(CoreError::SessionFrozen { .. })
        ));
        let audit = EventEnvelope::new("src".into(), "auditor", ActorRole::Auditor, "AUDIT");
        assert!(ledger.append(audit).is_ok());
        assert!(ledger.freeze(&"src".into(), "h2").is_err());
        assert!(!ledger.thaw(&"src".into(), "h2"));
        assert!(ledger.thaw(&"src".into(), "h1"));
        assert!(ledger.append(env("src", "CODE")).is_ok());
    }

    #[test]
    fn test_bootstrap_owns_slot_zero() {
        let ledger = EventLedger::in_memory();
        let target = SessionId::from("dst");
        ledger.reserve(&target, "h1").unwrap();
        assert!(matches!(
            ledger.append(EventEnvelope::new(target.clone(), "sys", ActorRole::System, "NOISE")),
            Err(CoreError::SessionReserved { .. })
        ));
        assert!(ledger.list_sessions(10).is_empty());

        let packet = EventEnvelope::new(
            target.clone(),
            "coordinator",
            ActorRole::System,
            lifecycle::CONTEXT_HANDOFF_PACKET,
        );
        assert!(ledger.bootstrap(&target, "other", packet.clone()).is_err());
        assert_eq!(ledger.bootstrap(&target, "h1", packet).unwrap(), 0);
        assert!(matches!(ledger.gate(&target), SessionGate::AwaitingVerification { .. }));
        assert!(matches!(
            ledger.append(env("dst", "CODE")),
            Err(CoreError::ResumeBlocked { .. })
        ));
        assert!(ledger.open_for_resume(&target, "h1"));
        assert_eq!(ledger.append(env("dst", "CODE")).unwrap(), 1);

        // A used session can no longer be reserved.
        assert!(matches!(
            ledger.reserve(&target, "h2"),
            Err(CoreError::SlotOccupied { .. })
        ));
    }

    #[test]
    fn test_block_and_clear_resume() {
        let ledger = EventLedger::in_memory();
        let target = SessionId::from("dst");
        ledger.reserve(&target, "h1").unwrap();
        let packet = EventEnvelope::new(
            target.clone(),
            "coordinator",
            ActorRole::System,
            lifecycle::CONTEXT_HANDOFF_PACKET,
        );
        ledger.bootstrap(&target, "h1", packet).unwrap();
        assert!(ledger.block_resume(&target, "h1", "probe `risks` failed"));
        match ledger.append(env("dst", "CODE")) {
            Err(CoreError::ResumeBlocked { reason, .. }) => assert!(reason.contains("risks")),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(ledger.clear_resume_block(&target));
        assert!(ledger.append(env("dst", "CODE")).is_ok());
    }

    #[test]
    fn test_reopen_file_ledger_documents_gaps() {
        let tmp = TempDir::new().unwrap();
        {
            let ledger = EventLedger::open_dir(tmp.path(), LedgerSettings::default()).unwrap();
            ledger.append(env("a", "ONE")).unwrap();
        }
        let path = tmp.path().join("session_a.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"garbage line\n").unwrap();
        let third = LedgerRecord {
            sequence: 2,
            envelope: env("a", "THREE"),
        };
        let mut line = serde_json::to_vec(&third).unwrap();
        line.push(b'\n');
        file.write_all(&line).unwrap();
        drop(file);

        let ledger = EventLedger::open_dir(tmp.path(), LedgerSettings::default()).unwrap();
        let records = ledger.read_all(&"a".into()).unwrap();
        assert_eq!(records.len(), 3);
        let tomb = records.last().unwrap();
        assert_eq!(tomb.event_type(), lifecycle::LEDGER_TOMBSTONE);
        assert_eq!(tomb.sequence, 3);
        assert!(ledger.contiguity(&"a".into()).unwrap().gap_free);
        drop(ledger);

        // Reopening does not add a second tombstone.
        let ledger = EventLedger::open_dir(tmp.path(), LedgerSettings::default()).unwrap();
        assert_eq!(ledger.session_len(&"a".into()), 3);
        let counts: BTreeMap<String, usize> =
            ledger
                .read_all(&"a".into())
                .unwrap()
                .into_iter()
                .fold(BTreeMap::new(), |mut acc, r| {
                    *acc.entry(r.envelope.event_type).or_default() += 1;
                    acc
                });
        assert_eq!(counts[lifecycle::LEDGER_TOMBSTONE], 1);
    }

    #[test]
    fn test_lost_final_record_is_tombstoned_on_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session_a.jsonl");
        {
            let ledger = EventLedger::open_dir(tmp.path(), LedgerSettings::default()).unwrap();
            ledger.append(env("a", "ONE")).unwrap();
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"{\"sequence\":1,\"env").unwrap();
            drop(file);
            assert_eq!(ledger.append(env("a", "TWO")).unwrap(), 1);
        }

        let ledger = EventLedger::open_dir(tmp.path(), LedgerSettings::default()).unwrap();
        let records = ledger.read_all(&"a".into()).unwrap();
        let types: Vec<&str> = records.iter().map(|r| r.event_type()).collect();
        assert_eq!(types, vec!["ONE", lifecycle::LEDGER_TOMBSTONE]);
        assert_eq!(tombstone_sequences(&records[1]), vec![1]);
        assert_eq!(records[1].sequence, 2);
        assert!(ledger.contiguity(&"a".into()).unwrap().gap_free);
        assert_eq!(ledger.append(env("a", "THREE")).unwrap(), 3);
        drop(ledger);

        let ledger = EventLedger::open_dir(tmp.path(), LedgerSettings::default()).unwrap();
        assert_eq!(ledger.session_len(&"a".into()), 3);
    }

    #[test]
    fn test_reopen_preserves_order_and_index() {
        let tmp = TempDir::new().unwrap();
        let first = env("a", "ONE");
        let first_id = first.event_id.clone();
        {
            let ledger = EventLedger::open_dir(tmp.path(), LedgerSettings::default()).unwrap();
            ledger.append(first).unwrap();
            ledger.append(env("a", "TWO")).unwrap();
        }
        let ledger = EventLedger::open_dir(tmp.path(), LedgerSettings::default()).unwrap();
        assert_eq!(ledger.next_sequence(&"a".into()), 2);
        assert!(ledger.contains_event(first_id.as_str()));
        let child = env("a", "THREE").with_parent(Some(first_id));
        assert_eq!(ledger.append(child).unwrap(), 2);
    }

    #[test]
    fn test_reopen_restores_handoff_gates() {
        let tmp = TempDir::new().unwrap();
        let system = |session: &str, event_type: &str, handoff_id: &str| {
            EventEnvelope::new(session.into(), "coordinator", ActorRole::System, event_type)
                .with_field("handoff_id", handoff_id)
                .with_field("target_session_id", "dst")
        };
        {
            let ledger = EventLedger::open_dir(tmp.path(), LedgerSettings::default()).unwrap();
            ledger.append(env("src", "PLAN")).unwrap();
            ledger.append(system("src", lifecycle::CONTEXT_HANDOFF_COMPLETED, "h1")).unwrap();
            let target = SessionId::from("dst");
            ledger.reserve(&target, "h1").unwrap();
            ledger
                .bootstrap(&target, "h1", system("dst", lifecycle::CONTEXT_HANDOFF_PACKET, "h1"))
                .unwrap();

            let blocked = SessionId::from("dst2");
            ledger.reserve(&blocked, "h2").unwrap();
            ledger
                .bootstrap(&blocked, "h2", system("dst2", lifecycle::CONTEXT_HANDOFF_PACKET, "h2"))
                .unwrap();
            ledger
                .append(
                    system("other", lifecycle::CONTEXT_HANDOFF_FAILED, "h2")
                        .with_field("detail", "probe `risks` failed"),
                )
                .unwrap();
        }

        let ledger = EventLedger::open_dir(tmp.path(), LedgerSettings::default()).unwrap();
        assert!(matches!(ledger.gate(&"src".into()), SessionGate::Retired { .. }));
        assert!(matches!(
            ledger.append(env("src", "CODE")),
            Err(CoreError::SessionFrozen { .. })
        ));
        assert!(ledger.gate(&"dst".into()).is_open());
        match ledger.gate(&"dst2".into()) {
            SessionGate::ResumeBlocked { reason, .. } => assert!(reason.contains("risks")),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(ledger.gate(&"other".into()).is_open());
    }
}
