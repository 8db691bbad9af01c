use std::borrow::Borrow;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::CoreError;

pub const SCHEMA_VERSION: &str = "1.0.0";

const MAX_SESSION_ID_LEN: usize = 128;

/// Globally unique identifier of a ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Generate a fresh id: `evt_` followed by UUID v4 hex (no dashes).
    pub fn generate() -> Self {
        Self(format!("evt_{}", Uuid::new_v4().as_simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for EventId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identifier of a session (one bounded reasoning window).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Parse and validate a session id: 1-128 chars of `[A-Za-z0-9_.-]`,
    /// not starting with `.` (the id is used as a file name component).
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        validate_session_id(&s)?;
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

fn validate_session_id(s: &str) -> Result<(), CoreError> {
    if s.is_empty() || s.len() > MAX_SESSION_ID_LEN {
        return Err(CoreError::validation(
            "session_id",
            format!("length must be 1..={MAX_SESSION_ID_LEN}, got {}", s.len()),
        ));
    }
    if s.starts_with('.') {
        return Err(CoreError::validation("session_id", "must not start with '.'"));
    }
    if let Some(bad) = s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(CoreError::validation(
            "session_id",
            format!("invalid character {bad:?}"),
        ));
    }
    Ok(())
}

/// Who authored an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    /// Orchestrator / lead agent.
    #[serde(alias = "PM")]
    Lead,
    /// Delegated worker agent.
    #[serde(alias = "DEV")]
    Worker,
    Auditor,
    System,
    /// Human user.
    User,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Lead => "LEAD",
            ActorRole::Worker => "WORKER",
            ActorRole::Auditor => "AUDITOR",
            ActorRole::System => "SYSTEM",
            ActorRole::User => "USER",
        }
    }

    /// System and audit events are still admitted while a session is frozen.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, ActorRole::System | ActorRole::Auditor)
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    #[default]
    Global,
    Local,
    System,
    /// Internal autoprompt traffic.
    Autoprompt,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Global => "GLOBAL",
            Channel::Local => "LOCAL",
            Channel::System => "SYSTEM",
            Channel::Autoprompt => "AUTOPROMPT",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

/// The atomic, immutable unit of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventEnvelope {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub event_id: EventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<EventId>,
    pub session_id: SessionId,
    pub trace_id: String,
    pub timestamp_utc: DateTime<Utc>,
    pub actor_id: String,
    pub actor_role: ActorRole,
    #[serde(default)]
    pub channel: Channel,
    pub event_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub safety_flags: BTreeSet<String>,
    #[serde(default)]
    pub token_in: u64,
    #[serde(default)]
    pub token_out: u64,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

impl EventEnvelope {
    /// Start a new envelope with a generated id, the session id as trace id,
    /// and the current time.
    pub fn new(
        session_id: SessionId,
        actor_id: impl Into<String>,
        actor_role: ActorRole,
        event_type: impl Into<String>,
    ) -> Self {
        let trace_id = session_id.as_str().to_string();
        Self {
            schema_version: default_schema_version(),
            event_id: EventId::generate(),
            parent_event_id: None,
            session_id,
            trace_id,
            timestamp_utc: Utc::now(),
            actor_id: actor_id.into(),
            actor_role,
            channel: Channel::default(),
            event_type: event_type.into(),
            payload: Map::new(),
            safety_flags: BTreeSet::new(),
            token_in: 0,
            token_out: 0,
            latency_ms: 0,
            cost_usd: 0.0,
        }
    }

    /// Parse an envelope from untrusted JSON. Any shape error (unknown
    /// field, role or channel outside the closed sets, negative counters)
    /// is reported as a validation error.
    pub fn from_json(value: Value) -> Result<Self, CoreError> {
        let envelope: EventEnvelope = serde_json::from_value(value)
            .map_err(|e| CoreError::validation("envelope", e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }

    pub fn with_id(mut self, id: impl Into<EventId>) -> Self {
        self.event_id = id.into();
        self
    }

    pub fn with_parent(mut self, parent: Option<EventId>) -> Self {
        self.parent_event_id = parent;
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Insert a single payload field.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.safety_flags.insert(flag.into());
        self
    }

    pub fn with_tokens(mut self, token_in: u64, token_out: u64) -> Self {
        self.token_in = token_in;
        self.token_out = token_out;
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp_utc = timestamp;
        self
    }

    /// Stateless checks. The ledger adds uniqueness and parent existence.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_session_id(self.session_id.as_str())?;
        for (field, value) in [
            ("event_id", self.event_id.as_str()),
            ("trace_id", self.trace_id.as_str()),
            ("actor_id", self.actor_id.as_str()),
            ("event_type", self.event_type.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::validation(field, "must not be empty"));
            }
        }
        if self.parent_event_id.as_ref() == Some(&self.event_id) {
            return Err(CoreError::validation(
                "parent_event_id",
                "an event cannot be its own parent",
            ));
        }
        if !self.cost_usd.is_finite() || self.cost_usd < 0.0 {
            return Err(CoreError::validation(
                "cost_usd",
                format!("must be finite and non-negative, got {}", self.cost_usd),
            ));
        }
        Ok(())
    }

    /// Total tokens consumed by this event.
    pub fn total_tokens(&self) -> u64 {
        self.token_in.saturating_add(self.token_out)
    }

    /// Read a string payload field.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// An envelope together with the sequence the ledger assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub sequence: u64,
    pub envelope: EventEnvelope,
}

impl LedgerRecord {
    pub fn event_id(&self) -> &EventId {
        &self.envelope.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.envelope.event_type
    }
}
