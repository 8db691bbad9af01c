use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use baton_core::config::HandoffVocabulary;
use baton_core::error::CoreError;
use baton_core::model::lifecycle::CONTEXT_HANDOFF_REQUESTED;
use baton_core::model::{ActorRole, Channel, EventEnvelope, EventId, SessionId, Severity};
use baton_core::EventLedger;

/// Event type of a free-form message.
pub const MESSAGE: &str = "MESSAGE";

/// Usage attached to the next recorded event.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Usage {
    token_in: u64,
    token_out: u64,
    latency_ms: u64,
    cost_usd: f64,
}

/// What one recorder has appended so far.
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderTotals {
    pub events: usize,
    pub token_in: u64,
    pub token_out: u64,
    pub cost_usd: f64,
    pub started_at: DateTime<Utc>,
    pub last_event: Option<EventId>,
}

/// A fluent recorder that appends well-formed events for one actor in one
/// session.
///
/// Each recorded event names the previous one as its parent, so the
/// session forms a causal chain the handoff pruner can follow. Semantic
/// events use the same vocabulary the handoff snapshot reads.
pub struct SessionRecorder {
    ledger: Arc<EventLedger>,
    session: SessionId,
    actor_id: String,
    role: ActorRole,
    channel: Channel,
    trace_id: Option<String>,
    vocabulary: HandoffVocabulary,
    chained: bool,
    pending: Usage,
    totals: RecorderTotals,
}

impl SessionRecorder {
    /// Begin recording as `actor_id` with `role` in `session`.
    pub fn begin(
        ledger: Arc<EventLedger>,
        session: impl Into<SessionId>,
        actor_id: &str,
        role: ActorRole,
    ) -> Self {
        Self {
            ledger,
            session: session.into(),
            actor_id: actor_id.to_string(),
            role,
            channel: Channel::default(),
            trace_id: None,
            vocabulary: HandoffVocabulary::default(),
            chained: true,
            pending: Usage::default(),
            totals: RecorderTotals {
                events: 0,
                token_in: 0,
                token_out: 0,
                cost_usd: 0.0,
                started_at: Utc::now(),
                last_event: None,
            },
        }
    }

    pub fn channel(&mut self, channel: Channel) -> &mut Self {
        self.channel = channel;
        self
    }

    /// Group subsequent events under a trace other than the session id.
    pub fn trace(&mut self, trace_id: &str) -> &mut Self {
        self.trace_id = Some(trace_id.to_string());
        self
    }

    /// Event type names to emit; match the coordinator's configuration.
    pub fn vocabulary(&mut self, vocabulary: HandoffVocabulary) -> &mut Self {
        self.vocabulary = vocabulary;
        self
    }

    /// Stop linking events to their predecessor.
    pub fn unchained(&mut self) -> &mut Self {
        self.chained = false;
        self
    }

    /// Continue a chain started elsewhere.
    pub fn after(&mut self, parent: EventId) -> &mut Self {
        self.totals.last_event = Some(parent);
        self
    }

    /// Add usage to the next recorded event. Accumulates across calls.
    pub fn usage(&mut self, token_in: u64, token_out: u64, cost_usd: Option<f64>) -> &mut Self {
        self.pending.token_in += token_in;
        self.pending.token_out += token_out;
        if let Some(cost) = cost_usd {
            self.pending.cost_usd += cost;
        }
        self
    }

    pub fn latency(&mut self, latency_ms: u64) -> &mut Self {
        self.pending.latency_ms = latency_ms;
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session
    }

    pub fn totals(&self) -> &RecorderTotals {
        &self.totals
    }

    /// An envelope preloaded with this recorder's identity, channel, trace
    /// and parent. Append it with [`SessionRecorder::record`].
    pub fn draft(&self, event_type: &str) -> EventEnvelope {
        let mut env = EventEnvelope::new(self.session.clone(), self.actor_id.as_str(), self.role, event_type)
            .with_channel(self.channel);
        if let Some(trace) = &self.trace_id {
            env = env.with_trace(trace.as_str());
        }
        if self.chained {
            env = env.with_parent(self.totals.last_event.clone());
        }
        env
    }

    /// Append an envelope, attaching pending usage. Returns its id.
    pub fn record(&mut self, envelope: EventEnvelope) -> Result<EventId, CoreError> {
        let usage = self.pending;
        let token_in = envelope.token_in.saturating_add(usage.token_in);
        let token_out = envelope.token_out.saturating_add(usage.token_out);
        let latency_ms = envelope.latency_ms.max(usage.latency_ms);
        let cost = envelope.cost_usd + usage.cost_usd;
        let envelope = envelope
            .with_tokens(token_in, token_out)
            .with_latency(latency_ms)
            .with_cost(cost);
        let event_id = envelope.event_id.clone();
        let event_type = envelope.event_type.clone();

        let sequence = self.ledger.append(envelope)?;

        self.pending = Usage::default();
        self.totals.events += 1;
        self.totals.token_in += token_in;
        self.totals.token_out += token_out;
        self.totals.cost_usd += cost;
        self.totals.last_event = Some(event_id.clone());
        tracing::debug!(
            session_id = %self.session,
            actor = %self.actor_id,
            sequence,
            "Recorded {event_type}"
        );
        Ok(event_id)
    }

    /// Record an event of any type with the given payload fields.
    pub fn event(
        &mut self,
        event_type: &str,
        fields: impl IntoIterator<Item = (&'static str, Value)>,
    ) -> Result<EventId, CoreError> {
        let mut env = self.draft(event_type);
        for (key, value) in fields {
            env = env.with_field(key, value);
        }
        self.record(env)
    }

    pub fn message(&mut self, text: &str) -> Result<EventId, CoreError> {
        let env = self.draft(MESSAGE).with_field("message", text);
        self.record(env)
    }

    /// State the mission a handoff must carry forward.
    pub fn mission(&mut self, statement: &str) -> Result<EventId, CoreError> {
        require("statement", statement)?;
        let env = self
            .draft(&self.vocabulary.mission)
            .with_field("statement", statement);
        self.record(env)
    }

    pub fn open_thread(&mut self, thread_id: &str, title: &str) -> Result<EventId, CoreError> {
        require("thread_id", thread_id)?;
        let env = self
            .draft(&self.vocabulary.thread_opened)
            .with_field("thread_id", thread_id)
            .with_field("title", title);
        self.record(env)
    }

    pub fn update_thread(&mut self, thread_id: &str, note: &str) -> Result<EventId, CoreError> {
        require("thread_id", thread_id)?;
        let env = self
            .draft(&self.vocabulary.thread_updated)
            .with_field("thread_id", thread_id)
            .with_field("note", note);
        self.record(env)
    }

    pub fn resolve_thread(&mut self, thread_id: &str) -> Result<EventId, CoreError> {
        require("thread_id", thread_id)?;
        let env = self
            .draft(&self.vocabulary.thread_resolved)
            .with_field("thread_id", thread_id);
        self.record(env)
    }

    /// Record a decision. The decision event itself is always evidence;
    /// `supporting` adds earlier events that justify it.
    pub fn decision(
        &mut self,
        decision: &str,
        rationale: &str,
        supporting: &[EventId],
    ) -> Result<EventId, CoreError> {
        require("decision", decision)?;
        let mut env = self
            .draft(&self.vocabulary.decision)
            .with_field("decision", decision)
            .with_field("rationale", rationale);
        if !supporting.is_empty() {
            let ids: Vec<Value> = supporting.iter().map(|id| Value::from(id.as_str())).collect();
            env = env.with_field("supporting_event_ids", ids);
        }
        self.record(env)
    }

    /// Record a created (first time) or updated artifact.
    pub fn artifact(&mut self, artifact_id: &str, created: bool) -> Result<EventId, CoreError> {
        require("artifact_id", artifact_id)?;
        let index = usize::from(!created);
        let event_type = self
            .vocabulary
            .artifact
            .get(index)
            .or_else(|| self.vocabulary.artifact.first())
            .cloned()
            .ok_or_else(|| CoreError::Config("no artifact event type configured".into()))?;
        let env = self.draft(&event_type).with_field("artifact_id", artifact_id);
        self.record(env)
    }

    pub fn risk(
        &mut self,
        risk_id: &str,
        risk: &str,
        severity: Severity,
        mitigation: Option<&str>,
    ) -> Result<EventId, CoreError> {
        require("risk_id", risk_id)?;
        let mut env = self
            .draft(&self.vocabulary.risk_identified)
            .with_field("risk_id", risk_id)
            .with_field("risk", risk)
            .with_field("severity", severity.as_str());
        if let Some(m) = mitigation {
            env = env.with_field("mitigation", m);
        }
        self.record(env)
    }

    pub fn mitigate_risk(&mut self, risk_id: &str, mitigation: &str) -> Result<EventId, CoreError> {
        require("risk_id", risk_id)?;
        let env = self
            .draft(&self.vocabulary.risk_mitigated)
            .with_field("risk_id", risk_id)
            .with_field("mitigation", mitigation);
        self.record(env)
    }

    /// Ask for a context-window handoff at the next trigger evaluation.
    pub fn request_handoff(&mut self, reason: &str) -> Result<EventId, CoreError> {
        let env = self.draft(CONTEXT_HANDOFF_REQUESTED).with_field("reason", reason);
        self.record(env)
    }
}

fn require(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(field, "must not be empty"));
    }
    Ok(())
}
