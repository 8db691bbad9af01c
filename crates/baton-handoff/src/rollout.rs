//! Rollout windows: the handoffs a quality gate is evaluated over, read
//! back from the lifecycle events coordinators left in source sessions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use baton_core::model::lifecycle::{
    CONTEXT_HANDOFF_COMPLETED, CONTEXT_HANDOFF_FAILED, CONTEXT_HANDOFF_STARTED,
};
use baton_core::model::{LedgerRecord, SessionId};
use baton_core::{CoreError, EventLedger};

use crate::coordinator::{summary_of, HandoffSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalOutcome {
    Completed,
    Failed,
    /// Started but never reached a terminal event.
    Pending,
}

impl TerminalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalOutcome::Completed => "COMPLETED",
            TerminalOutcome::Failed => "FAILED",
            TerminalOutcome::Pending => "PENDING",
        }
    }
}

/// One handoff as seen from its source session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub handoff_id: String,
    pub source_session_id: SessionId,
    pub target_session_id: Option<SessionId>,
    pub started_at: Option<DateTime<Utc>>,
    pub outcome: TerminalOutcome,
    /// Reason code of a failed run.
    pub reason: Option<String>,
    pub summary: Option<HandoffSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolloutWindow {
    pub handoffs: Vec<HandoffRecord>,
}

impl RolloutWindow {
    pub fn new(handoffs: Vec<HandoffRecord>) -> Self {
        Self { handoffs }
    }

    /// Handoffs recorded in one source session, in start order.
    pub fn from_records(source: &SessionId, records: &[LedgerRecord]) -> Vec<HandoffRecord> {
        let mut order: Vec<String> = Vec::new();
        let mut by_id: BTreeMap<String, HandoffRecord> = BTreeMap::new();

        for record in records {
            let envelope = &record.envelope;
            let event_type = envelope.event_type.as_str();
            if ![
                CONTEXT_HANDOFF_STARTED,
                CONTEXT_HANDOFF_COMPLETED,
                CONTEXT_HANDOFF_FAILED,
            ]
            .contains(&event_type)
            {
                continue;
            }
            let Some(handoff_id) = envelope.payload_str("handoff_id") else {
                continue;
            };
            let entry = by_id.entry(handoff_id.to_string()).or_insert_with(|| {
                order.push(handoff_id.to_string());
                HandoffRecord {
                    handoff_id: handoff_id.to_string(),
                    source_session_id: source.clone(),
                    target_session_id: envelope
                        .payload_str("target_session_id")
                        .map(SessionId::from),
                    started_at: None,
                    outcome: TerminalOutcome::Pending,
                    reason: None,
                    summary: None,
                }
            });
            match event_type {
                CONTEXT_HANDOFF_STARTED => entry.started_at = Some(envelope.timestamp_utc),
                CONTEXT_HANDOFF_COMPLETED => {
                    entry.outcome = TerminalOutcome::Completed;
                    entry.summary = summary_of(&envelope.payload);
                }
                _ => {
                    entry.outcome = TerminalOutcome::Failed;
                    entry.reason = envelope.payload_str("reason").map(str::to_string);
                    entry.summary = summary_of(&envelope.payload);
                }
            }
        }

        order
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect()
    }

    pub fn collect(ledger: &EventLedger, sessions: &[SessionId]) -> Result<Self, CoreError> {
        let mut handoffs = Vec::new();
        for session in sessions {
            handoffs.extend(Self::from_records(session, &ledger.read_all(session)?));
        }
        Ok(Self { handoffs })
    }

    /// Window over the `limit_sessions` most recently active sessions, and a
    /// baseline over the next `limit_sessions` older ones.
    pub fn recent_with_baseline(
        ledger: &EventLedger,
        limit_sessions: usize,
    ) -> Result<(Self, Self), CoreError> {
        let sessions = ledger.list_sessions(limit_sessions.saturating_mul(2));
        let split = sessions.len().min(limit_sessions);
        let (window, baseline) = sessions.split_at(split);
        Ok((Self::collect(ledger, window)?, Self::collect(ledger, baseline)?))
    }

    pub fn len(&self) -> usize {
        self.handoffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handoffs.is_empty()
    }

    pub fn count(&self, outcome: TerminalOutcome) -> usize {
        self.handoffs.iter().filter(|h| h.outcome == outcome).count()
    }

    /// Share of started handoffs with no terminal event; 0.0 when empty.
    pub fn silent_failure_rate(&self) -> f64 {
        if self.handoffs.is_empty() {
            return 0.0;
        }
        self.count(TerminalOutcome::Pending) as f64 / self.handoffs.len() as f64
    }
}
