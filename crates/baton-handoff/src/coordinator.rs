//! HandoffCoordinator: drives one context-window transition
//! `TRIGGERED → FROZEN → SNAPSHOTTED → COMPRESSED → PRUNED → VALIDATED →
//! BOOTSTRAPPED → VERIFIED → COMPLETED`, or `FAILED` with a reason code.
//!
//! The run is cancellable up to VALIDATED: dropping the future thaws the
//! source, releases the target and records `CANCELLED`. From BOOTSTRAPPED
//! on the remainder runs on a detached task and always reaches a terminal
//! state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use baton_core::config::BatonConfig;
use baton_core::error::CoreError;
use baton_core::model::lifecycle::{
    CONTEXT_HANDOFF_BOOTSTRAPPED, CONTEXT_HANDOFF_COMPLETED, CONTEXT_HANDOFF_FAILED,
    CONTEXT_HANDOFF_PACKET, CONTEXT_HANDOFF_PACKET_BUILT, CONTEXT_HANDOFF_STARTED,
    CONTEXT_HANDOFF_VALIDATED,
};
use baton_core::model::{
    probe_pass_rate, ActorRole, Channel, EventEnvelope, EventId, HandoffPacket, ProbeResult,
    SessionId,
};
use baton_core::EventLedger;

use crate::alerts;
use crate::compress::compress;
use crate::error::{FailureReason, HandoffError};
use crate::probes::{ContinuityProbe, ContinuityProbeRunner};
use crate::prune::prune;
use crate::snapshot::Snapshot;
use crate::state::{HandoffState, StateTrail};
use crate::trigger::{self, TriggerReason};
use crate::validate::validate_packet;

/// `actor_id` of every event the coordinator writes.
pub const COORDINATOR_ACTOR: &str = "handoff-coordinator";

/// Deterministic id of a transition: first 32 hex chars of
/// SHA-256(`source|target|trigger_sequence`).
pub fn handoff_id(source: &SessionId, target: &SessionId, trigger_sequence: u64) -> String {
    let digest = Sha256::digest(format!("{source}|{target}|{trigger_sequence}").as_bytes());
    digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone)]
pub struct HandoffRequest {
    pub source: SessionId,
    pub target: SessionId,
    pub trigger: TriggerReason,
    /// Caller-imposed bound on the whole run.
    pub deadline: Option<Duration>,
}

impl HandoffRequest {
    pub fn new(source: SessionId, target: SessionId, trigger: TriggerReason) -> Self {
        Self {
            source,
            target,
            trigger,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

const LEDGER_WRITE_ATTEMPTS: u32 = 3;
const LEDGER_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Outcome summary written into the `summary` payload field of the
/// COMPLETED and FAILED lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffSummary {
    pub handoff_id: String,
    pub source_session_id: SessionId,
    pub target_session_id: SessionId,
    pub state: HandoffState,
    /// State the run was in when it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<HandoffState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub coverage_score: Option<f64>,
    pub confidence_score: Option<f64>,
    pub invariants_passed: Option<bool>,
    #[serde(default)]
    pub continuity_probe_results: Vec<ProbeResult>,
    pub attempts: u32,
    pub evidence_budget: usize,
}

impl HandoffSummary {
    /// passed / total over the recorded probes; `None` when no probe ran.
    pub fn continuity_probe_pass_rate(&self) -> Option<f64> {
        (!self.continuity_probe_results.is_empty())
            .then(|| probe_pass_rate(&self.continuity_probe_results))
    }
}

/// Result of a completed transition.
#[derive(Debug, Clone, Serialize)]
pub struct HandoffOutcome {
    pub handoff_id: String,
    pub states: Vec<HandoffState>,
    pub packet: HandoffPacket,
    pub attempts: u32,
    pub evidence_budget: usize,
    /// Claims removed by compression and pruning.
    pub dropped: Vec<String>,
    pub continuity_probe_pass_rate: f64,
}

impl HandoffOutcome {
    pub fn state(&self) -> HandoffState {
        self.states.last().copied().unwrap_or(HandoffState::Failed)
    }
}

struct Inner {
    ledger: Arc<EventLedger>,
    config: BatonConfig,
    in_flight: Arc<Mutex<HashSet<SessionId>>>,
    probes: ContinuityProbeRunner,
}

/// Exclusive hold on a source/target pair for one run.
struct PairLock {
    in_flight: Arc<Mutex<HashSet<SessionId>>>,
    sessions: [SessionId; 2],
}

impl PairLock {
    fn acquire(
        in_flight: &Arc<Mutex<HashSet<SessionId>>>,
        source: &SessionId,
        target: &SessionId,
    ) -> Result<Self, HandoffError> {
        let mut held = in_flight.lock();
        for s in [source, target] {
            if held.contains(s) {
                return Err(HandoffError::Busy(s.to_string()));
            }
        }
        held.insert(source.clone());
        held.insert(target.clone());
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            sessions: [source.clone(), target.clone()],
        })
    }
}

impl Drop for PairLock {
    fn drop(&mut self) {
        let mut held = self.in_flight.lock();
        for s in &self.sessions {
            held.remove(s);
        }
    }
}

#[derive(Clone)]
pub struct HandoffCoordinator {
    inner: Arc<Inner>,
}

impl HandoffCoordinator {
    pub fn new(ledger: Arc<EventLedger>, config: BatonConfig) -> Self {
        let timeout = Duration::from_millis(config.handoff.probe_timeout_ms);
        let probes = ContinuityProbeRunner::new(Arc::clone(&ledger), timeout);
        Self::build(ledger, config, probes)
    }

    /// Replace the built-in continuity probes.
    pub fn with_probes(
        ledger: Arc<EventLedger>,
        config: BatonConfig,
        probes: Vec<Arc<dyn ContinuityProbe>>,
    ) -> Self {
        let timeout = Duration::from_millis(config.handoff.probe_timeout_ms);
        let probes = ContinuityProbeRunner::with_probes(Arc::clone(&ledger), probes, timeout);
        Self::build(ledger, config, probes)
    }

    fn build(ledger: Arc<EventLedger>, config: BatonConfig, probes: ContinuityProbeRunner) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger,
                config,
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                probes,
            }),
        }
    }

    pub fn ledger(&self) -> &Arc<EventLedger> {
        &self.inner.ledger
    }

    pub fn config(&self) -> &BatonConfig {
        &self.inner.config
    }

    /// Evaluate the trigger policy against a session's current records.
    pub fn check_trigger(&self, source: &SessionId) -> Result<Option<TriggerReason>, HandoffError> {
        let records = self.inner.ledger.read_all(source)?;
        Ok(trigger::evaluate(&records, &self.inner.config.handoff))
    }

    /// Lift a repeated-failure block after review.
    pub fn clear_block(&self, source: &SessionId, cleared_by: &str) -> Result<bool, HandoffError> {
        alerts::clear_block(
            &self.inner.ledger,
            source,
            self.inner.config.handoff.repeated_failure_ceiling,
            cleared_by,
        )
    }

    /// Run one transition to a terminal state.
    pub async fn run(&self, request: HandoffRequest) -> Result<HandoffOutcome, HandoffError> {
        let HandoffRequest {
            source,
            target,
            trigger,
            deadline,
        } = request;
        let ledger = &self.inner.ledger;

        if source == target {
            return Err(HandoffError::InvalidRequest(
                "source and target sessions must differ".into(),
            ));
        }
        if ledger.session_len(&source) == 0 {
            return Err(CoreError::NotFound {
                id: source.to_string(),
            }
            .into());
        }
        alerts::ensure_not_blocked(
            ledger,
            &source,
            self.inner.config.handoff.repeated_failure_ceiling,
        )?;
        let pair = PairLock::acquire(&self.inner.in_flight, &source, &target)?;

        let trigger_sequence = ledger.next_sequence(&source);
        let id = handoff_id(&source, &target, trigger_sequence);
        let deadline = deadline.map(|d| Instant::now() + d);
        tracing::info!(
            handoff_id = %id,
            session_id = %source,
            target = %target,
            "Handoff triggered"
        );

        let mut run = Run {
            coordinator: self.clone(),
            handoff_id: id,
            source,
            target,
            trail: StateTrail::new(),
            frozen: false,
            reserved: false,
            armed: true,
            last_event: None,
            attempts: 0,
            evidence_budget: 0,
            metrics: None,
            _pair: pair,
        };

        let prepared = match run.prepare(trigger, trigger_sequence, deadline).await {
            Ok(prepared) => prepared,
            Err(e) => {
                run.fail(&e, None).await;
                return Err(e);
            }
        };

        // The packet is visible in the target now; finish on a task that
        // outlives this future.
        run.armed = false;
        tokio::spawn(run.finish(prepared, deadline)).await?
    }
}

/// What phase one hands to the detached remainder.
struct Prepared {
    packet: HandoffPacket,
    dropped: Vec<String>,
}

struct Run {
    coordinator: HandoffCoordinator,
    handoff_id: String,
    source: SessionId,
    target: SessionId,
    trail: StateTrail,
    frozen: bool,
    reserved: bool,
    /// Roll back and record CANCELLED when dropped.
    armed: bool,
    last_event: Option<EventId>,
    attempts: u32,
    evidence_budget: usize,
    /// (coverage, confidence, invariants_passed) once known.
    metrics: Option<(f64, f64, Option<bool>)>,
    _pair: PairLock,
}

impl Run {
    fn ledger(&self) -> &EventLedger {
        &self.coordinator.inner.ledger
    }

    fn config(&self) -> &BatonConfig {
        &self.coordinator.inner.config
    }

    fn advance(&mut self, to: HandoffState) {
        if self.trail.advance(to) {
            tracing::debug!(handoff_id = %self.handoff_id, state = %to, "Handoff state");
        }
    }

    async fn checkpoint(&self, deadline: Option<Instant>) -> Result<(), HandoffError> {
        tokio::task::yield_now().await;
        match deadline {
            Some(d) if Instant::now() >= d => Err(HandoffError::Timeout {
                state: self.trail.current(),
            }),
            _ => Ok(()),
        }
    }

    /// Lifecycle event for the source session, chained to the previous one.
    fn lifecycle_event(&self, event_type: &str, extra: Value) -> EventEnvelope {
        let mut envelope = EventEnvelope::new(
            self.source.clone(),
            COORDINATOR_ACTOR,
            ActorRole::System,
            event_type,
        )
        .with_channel(Channel::System)
        .with_trace(format!("handoff:{}", self.handoff_id))
        .with_parent(self.last_event.clone())
        .with_field("handoff_id", self.handoff_id.as_str())
        .with_field("target_session_id", self.target.as_str());
        if let Value::Object(map) = extra {
            envelope.payload.extend(map);
        }
        envelope
    }

    fn emitted(&mut self, event_type: &str, event_id: EventId, sequence: u64) {
        self.last_event = Some(event_id);
        tracing::info!(
            handoff_id = %self.handoff_id,
            session_id = %self.source,
            state = %self.trail.current(),
            sequence,
            "{event_type}"
        );
    }

    async fn emit(&mut self, event_type: &str, extra: Value) -> Result<u64, HandoffError> {
        let envelope = self.lifecycle_event(event_type, extra);
        let event_id = envelope.event_id.clone();
        let sequence = append_with_backoff(self.ledger(), envelope).await?;
        self.emitted(event_type, event_id, sequence);
        Ok(sequence)
    }

    async fn prepare(
        &mut self,
        trigger: TriggerReason,
        trigger_sequence: u64,
        deadline: Option<Instant>,
    ) -> Result<Prepared, HandoffError> {
        if let TriggerReason::ExplicitRequest { event_id } = &trigger {
            if self.ledger().contains_event(event_id.as_str()) {
                self.last_event = Some(event_id.clone());
            }
        }
        self.emit(
            CONTEXT_HANDOFF_STARTED,
            json!({ "trigger": trigger, "trigger_sequence": trigger_sequence }),
        )
        .await?;
        self.checkpoint(deadline).await?;

        // FROZEN
        self.ledger().freeze(&self.source, &self.handoff_id)?;
        self.frozen = true;
        self.ledger().reserve(&self.target, &self.handoff_id)?;
        self.reserved = true;
        self.advance(HandoffState::Frozen);
        let snapshot_sequence = self.ledger().next_sequence(&self.source);
        self.checkpoint(deadline).await?;

        // SNAPSHOTTED, widening the evidence budget on shortfall
        let snapshot = Snapshot::take(self.ledger(), &self.source, snapshot_sequence, self.config())?;
        let policy = self.config().handoff.clone();
        let gates = self.config().gates.clone();
        let mut budget = policy.initial_evidence_budget;
        let draft = loop {
            self.attempts += 1;
            self.evidence_budget = budget;
            let ledger = Arc::clone(&self.coordinator.inner.ledger);
            let draft = snapshot.draft(&self.handoff_id, &self.target, budget, |id| {
                ledger.contains_event(id.as_str())
            });
            self.advance(HandoffState::Snapshotted);
            let (coverage, confidence) = (draft.packet.coverage_score, draft.packet.confidence_score);
            self.metrics = Some((coverage, confidence, None));

            if coverage >= gates.min_coverage && confidence >= gates.min_confidence {
                break draft;
            }
            if self.attempts > policy.max_coverage_retries {
                return Err(HandoffError::CoverageShortfall {
                    coverage,
                    confidence,
                    min_coverage: gates.min_coverage,
                    min_confidence: gates.min_confidence,
                    attempts: self.attempts,
                    evidence_budget: budget,
                });
            }
            let grown = (budget as f64 * policy.budget_growth_factor).ceil();
            let next = if grown.is_finite() && grown < usize::MAX as f64 {
                grown as usize
            } else {
                usize::MAX
            };
            budget = next.max(budget.saturating_add(1));
            tracing::warn!(
                handoff_id = %self.handoff_id,
                coverage,
                confidence,
                attempt = self.attempts,
                next_budget = budget,
                "Coverage shortfall; widening evidence budget"
            );
            self.checkpoint(deadline).await?;
        };

        // COMPRESSED
        let mut packet = draft.packet;
        let ledger = Arc::clone(&self.coordinator.inner.ledger);
        let mut dropped = compress(&mut packet, policy.max_evidence_per_claim, |id| {
            ledger.contains_event(id.as_str())
        })
        .0;
        self.advance(HandoffState::Compressed);
        self.checkpoint(deadline).await?;

        // PRUNED
        dropped.extend(prune(&mut packet, &snapshot.records, policy.max_items_per_section).0);
        self.advance(HandoffState::Pruned);
        self.checkpoint(deadline).await?;

        // VALIDATED
        let violations = validate_packet(&packet, |id| ledger.contains_event(id.as_str()));
        packet.invariants_passed = violations.is_empty();
        self.metrics = Some((
            packet.coverage_score,
            packet.confidence_score,
            Some(packet.invariants_passed),
        ));
        self.emit(
            CONTEXT_HANDOFF_PACKET_BUILT,
            json!({
                "claims": packet.claim_count(),
                "dropped": dropped.len(),
                "coverage_score": packet.coverage_score,
                "confidence_score": packet.confidence_score,
                "invariants_passed": packet.invariants_passed,
                "evidence_budget": self.evidence_budget,
            }),
        )
        .await?;
        if !violations.is_empty() {
            return Err(HandoffError::Validation {
                violations: violations.iter().map(ToString::to_string).collect(),
            });
        }
        self.advance(HandoffState::Validated);
        self.emit(CONTEXT_HANDOFF_VALIDATED, json!({})).await?;
        self.checkpoint(deadline).await?;

        // BOOTSTRAPPED: no await from here until the run is detached.
        let record = EventEnvelope::new(
            self.target.clone(),
            COORDINATOR_ACTOR,
            ActorRole::System,
            CONTEXT_HANDOFF_PACKET,
        )
        .with_channel(Channel::System)
        .with_trace(format!("handoff:{}", self.handoff_id))
        .with_field("handoff_id", self.handoff_id.as_str())
        .with_field("source_session_id", self.source.as_str())
        .with_field("packet", serde_json::to_value(&packet)?);
        self.ledger().bootstrap(&self.target, &self.handoff_id, record)?;
        self.reserved = false;
        self.advance(HandoffState::Bootstrapped);
        self.emit(
            CONTEXT_HANDOFF_BOOTSTRAPPED,
            json!({ "target_sequence": 0 }),
        )
        .await?;

        Ok(Prepared { packet, dropped })
    }

    async fn finish(
        mut self,
        prepared: Prepared,
        deadline: Option<Instant>,
    ) -> Result<HandoffOutcome, HandoffError> {
        let Prepared {
            mut packet,
            dropped,
        } = prepared;

        let results = match self.coordinator.inner.probes.run(&packet, deadline).await {
            Ok(results) => results,
            Err(e) => {
                let reason = format!("continuity verification did not finish: {e}");
                self.ledger().block_resume(&self.target, &self.handoff_id, &reason);
                self.fail(&e, Some(&packet)).await;
                return Err(e);
            }
        };
        packet.continuity_probe_results = results;
        let pass_rate = packet.continuity_probe_pass_rate();
        let policy = &self.config().handoff;

        if pass_rate < policy.resume_threshold {
            let failing: Vec<&ProbeResult> =
                packet.continuity_probe_results.iter().filter(|r| !r.pass).collect();
            let reason = failing
                .iter()
                .map(|r| format!("probe `{}` failed: {}", r.probe_category, r.detail))
                .collect::<Vec<_>>()
                .join("; ");
            self.ledger().block_resume(&self.target, &self.handoff_id, &reason);
            let err = HandoffError::ProbeFailure {
                failed: failing.iter().map(|r| r.probe_category.to_string()).collect(),
                pass_rate,
            };
            self.fail(&err, Some(&packet)).await;
            return Err(err);
        }
        self.advance(HandoffState::Verified);

        // COMPLETED
        self.ledger().open_for_resume(&self.target, &self.handoff_id);
        self.ledger().retire(&self.source, &self.handoff_id, &self.target);
        self.frozen = false;
        self.advance(HandoffState::Completed);
        let summary = self.summary(Some(&packet), None, None);
        self.emit(
            CONTEXT_HANDOFF_COMPLETED,
            json!({ "summary": summary, "continuity_probe_pass_rate": pass_rate }),
        )
        .await?;
        tracing::info!(
            handoff_id = %self.handoff_id,
            session_id = %self.source,
            target = %self.target,
            coverage = packet.coverage_score,
            confidence = packet.confidence_score,
            pass_rate,
            "Handoff completed"
        );

        Ok(HandoffOutcome {
            handoff_id: self.handoff_id.clone(),
            states: self.trail.states().to_vec(),
            packet,
            attempts: self.attempts,
            evidence_budget: self.evidence_budget,
            dropped,
            continuity_probe_pass_rate: pass_rate,
        })
    }

    fn summary(
        &self,
        packet: Option<&HandoffPacket>,
        failed_in: Option<HandoffState>,
        error: Option<&HandoffError>,
    ) -> HandoffSummary {
        let (coverage, confidence, invariants) = match self.metrics {
            Some((c, f, i)) => (Some(c), Some(f), i),
            None => (None, None, None),
        };
        HandoffSummary {
            handoff_id: self.handoff_id.clone(),
            source_session_id: self.source.clone(),
            target_session_id: self.target.clone(),
            state: self.trail.current(),
            failed_in,
            reason: error.map(HandoffError::reason),
            detail: error.map(ToString::to_string),
            coverage_score: coverage,
            confidence_score: confidence,
            invariants_passed: invariants,
            continuity_probe_results: packet
                .map(|p| p.continuity_probe_results.clone())
                .unwrap_or_default(),
            attempts: self.attempts,
            evidence_budget: self.evidence_budget,
        }
    }

    /// Undo the gates a cancellable run has set.
    fn rollback(&mut self) {
        if self.frozen {
            self.ledger().thaw(&self.source, &self.handoff_id);
            self.frozen = false;
        }
        if self.reserved {
            self.ledger().release(&self.target, &self.handoff_id);
            self.reserved = false;
        }
    }

    /// Move to FAILED: restore the source, write the FAILED event and
    /// update the repeated-failure count. Errors here are logged, never
    /// raised over the original failure.
    async fn fail(&mut self, error: &HandoffError, packet: Option<&HandoffPacket>) {
        let (failed_in, envelope) = self.begin_failure(error, packet);
        let event_id = envelope.event_id.clone();
        let written = append_with_backoff(self.ledger(), envelope).await;
        self.end_failure(error, failed_in, event_id, written);
    }

    /// [`Run::fail`] for the drop path: a single write attempt.
    fn fail_now(&mut self, error: &HandoffError) {
        let (failed_in, envelope) = self.begin_failure(error, None);
        let event_id = envelope.event_id.clone();
        let written = self.ledger().append(envelope);
        self.end_failure(error, failed_in, event_id, written);
    }

    fn begin_failure(
        &mut self,
        error: &HandoffError,
        packet: Option<&HandoffPacket>,
    ) -> (HandoffState, EventEnvelope) {
        self.armed = false;
        let failed_in = self.trail.current();
        // After BOOTSTRAPPED the packet stays in the target behind its
        // resume block; only the source is thawed.
        self.rollback();
        self.advance(HandoffState::Failed);

        let summary = self.summary(packet, Some(failed_in), Some(error));
        let payload = json!({
            "reason": error.reason().as_str(),
            "failed_in": failed_in.as_str(),
            "detail": error.to_string(),
            "summary": summary,
        });
        (failed_in, self.lifecycle_event(CONTEXT_HANDOFF_FAILED, payload))
    }

    fn end_failure(
        &mut self,
        error: &HandoffError,
        failed_in: HandoffState,
        event_id: EventId,
        written: Result<u64, CoreError>,
    ) {
        match written {
            Ok(sequence) => self.emitted(CONTEXT_HANDOFF_FAILED, event_id, sequence),
            Err(e) => {
                tracing::error!(handoff_id = %self.handoff_id, "Could not record handoff failure: {e}")
            }
        }
        let reason = error.reason();
        tracing::warn!(
            handoff_id = %self.handoff_id,
            session_id = %self.source,
            failed_in = %failed_in,
            reason = %reason,
            "Handoff failed: {error}"
        );

        if reason != FailureReason::Cancelled {
            let ceiling = self.config().handoff.repeated_failure_ceiling;
            if let Err(e) = alerts::after_failure(self.ledger(), &self.source, ceiling, reason) {
                tracing::error!(session_id = %self.source, "Failure tracking failed: {e}");
            }
        }
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        if !self.armed || !self.trail.current().is_cancellable() {
            return;
        }
        let state = self.trail.current();
        self.fail_now(&HandoffError::Cancelled { state });
    }
}

/// Append, retrying I/O failures of the substrate with exponential backoff.
/// Validation and admission errors are returned at once.
async fn append_with_backoff(
    ledger: &EventLedger,
    envelope: EventEnvelope,
) -> Result<u64, CoreError> {
    let mut delay = LEDGER_RETRY_DELAY;
    let mut attempt = 1;
    loop {
        match ledger.append(envelope.clone()) {
            Err(CoreError::Io(e)) if attempt < LEDGER_WRITE_ATTEMPTS => {
                tracing::warn!(
                    session_id = %envelope.session_id,
                    attempt,
                    "Ledger write failed, retrying in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Payload fields of lifecycle events, for readers that do not want the
/// whole summary.
pub fn summary_of(payload: &Map<String, Value>) -> Option<HandoffSummary> {
    payload
        .get("summary")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}
