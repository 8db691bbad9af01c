//! ContinuityProbeRunner: one check per continuity category, run in
//! parallel against the packet bootstrapped into the target session.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;

use baton_core::model::lifecycle::CONTEXT_HANDOFF_PACKET;
use baton_core::model::{EventId, HandoffPacket, ProbeCategory, ProbeResult, SessionId};
use baton_core::EventLedger;

use crate::error::HandoffError;
use crate::state::HandoffState;

/// What a probe sees: the packet the coordinator validated and the packet
/// read back from sequence 0 of the target session.
pub struct ProbeContext {
    pub expected: HandoffPacket,
    pub stored: Result<HandoffPacket, String>,
    pub ledger: Arc<EventLedger>,
}

impl ProbeContext {
    pub fn resolves(&self, id: &EventId) -> bool {
        self.ledger.contains_event(id.as_str())
    }

    fn unresolved<'a>(&self, ids: impl IntoIterator<Item = &'a EventId>) -> Vec<&'a EventId> {
        ids.into_iter().filter(|id| !self.resolves(id)).collect()
    }
}

/// A side-effect free continuity check.
pub trait ContinuityProbe: Send + Sync {
    fn category(&self) -> ProbeCategory;
    fn check(&self, ctx: &ProbeContext) -> ProbeResult;
}

/// The built-in probe for one category.
#[derive(Debug, Clone, Copy)]
pub struct CategoryProbe(pub ProbeCategory);

impl ContinuityProbe for CategoryProbe {
    fn category(&self) -> ProbeCategory {
        self.0
    }

    fn check(&self, ctx: &ProbeContext) -> ProbeResult {
        let (pass, detail) = match &ctx.stored {
            Err(e) => (false, e.clone()),
            Ok(stored) => check_category(self.0, &ctx.expected, stored, ctx),
        };
        ProbeResult {
            probe_category: self.0,
            pass,
            detail,
        }
    }
}

fn check_category(
    category: ProbeCategory,
    expected: &HandoffPacket,
    stored: &HandoffPacket,
    ctx: &ProbeContext,
) -> (bool, String) {
    let dangling = |ids: Vec<&EventId>| -> Option<String> {
        (!ids.is_empty()).then(|| {
            let list: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
            format!("unresolved evidence: {}", list.join(", "))
        })
    };

    match category {
        ProbeCategory::Mission => {
            if stored.mission_statement.is_empty() {
                return (false, "mission statement missing".into());
            }
            if stored.mission_statement != expected.mission_statement {
                return (false, "mission statement differs from the validated packet".into());
            }
            if let Some(d) = dangling(ctx.unresolved(&stored.mission_evidence)) {
                return (false, d);
            }
            (true, format!("mission carried with {} citation(s)", stored.mission_evidence.len()))
        }
        ProbeCategory::Threads => {
            let want: Vec<&str> = expected.open_threads.iter().map(|t| t.thread_id.as_str()).collect();
            let got: Vec<&str> = stored.open_threads.iter().map(|t| t.thread_id.as_str()).collect();
            if want != got {
                return (false, format!("expected threads {want:?}, found {got:?}"));
            }
            if let Some(t) = stored.open_threads.iter().find(|t| t.evidence.is_empty()) {
                return (false, format!("thread {} cites no event", t.thread_id));
            }
            if let Some(d) = dangling(ctx.unresolved(stored.open_threads.iter().flat_map(|t| &t.evidence))) {
                return (false, d);
            }
            (true, format!("{} open thread(s) carried", got.len()))
        }
        ProbeCategory::Decisions => {
            let want: Vec<&str> = expected.decisions_log.iter().map(|d| d.decision.as_str()).collect();
            let got: Vec<&str> = stored.decisions_log.iter().map(|d| d.decision.as_str()).collect();
            if want != got {
                return (false, format!("expected {} decision(s), found {}", want.len(), got.len()));
            }
            if let Some(d) = stored
                .decisions_log
                .iter()
                .find(|d| d.supporting_event_ids.is_empty())
            {
                return (false, format!("decision `{}` has no supporting event", d.decision));
            }
            if let Some(d) = dangling(
                ctx.unresolved(stored.decisions_log.iter().flat_map(|d| &d.supporting_event_ids)),
            ) {
                return (false, d);
            }
            (true, format!("{} decision(s) carried with evidence", got.len()))
        }
        ProbeCategory::Artifacts => {
            let want: Vec<&str> = expected.artifacts_refs.iter().map(|a| a.artifact_id.as_str()).collect();
            let got: Vec<&str> = stored.artifacts_refs.iter().map(|a| a.artifact_id.as_str()).collect();
            if want != got {
                return (false, format!("expected artifacts {want:?}, found {got:?}"));
            }
            if let Some(d) = dangling(ctx.unresolved(stored.artifacts_refs.iter().flat_map(|a| &a.evidence))) {
                return (false, d);
            }
            (true, format!("{} artifact reference(s) carried", got.len()))
        }
        ProbeCategory::Risks => {
            let want: Vec<(&str, _)> = expected.risks.iter().map(|r| (r.risk_id.as_str(), r.severity)).collect();
            let got: Vec<(&str, _)> = stored.risks.iter().map(|r| (r.risk_id.as_str(), r.severity)).collect();
            if want != got {
                return (false, format!("expected {} risk(s), found {}", want.len(), got.len()));
            }
            if let Some(d) = dangling(ctx.unresolved(stored.risks.iter().flat_map(|r| &r.evidence))) {
                return (false, d);
            }
            let open = stored.risks.iter().filter(|r| r.mitigation.is_none()).count();
            (true, format!("{} risk(s) carried, {open} without mitigation", got.len()))
        }
    }
}

/// Runs every probe concurrently and waits for all of them; there is no
/// early exit, so the full report is always available.
pub struct ContinuityProbeRunner {
    ledger: Arc<EventLedger>,
    probes: Vec<Arc<dyn ContinuityProbe>>,
    timeout: Duration,
}

impl ContinuityProbeRunner {
    /// The built-in probe for every category.
    pub fn new(ledger: Arc<EventLedger>, timeout: Duration) -> Self {
        let probes = ProbeCategory::ALL
            .iter()
            .map(|c| Arc::new(CategoryProbe(*c)) as Arc<dyn ContinuityProbe>)
            .collect();
        Self::with_probes(ledger, probes, timeout)
    }

    pub fn with_probes(
        ledger: Arc<EventLedger>,
        probes: Vec<Arc<dyn ContinuityProbe>>,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            probes,
            timeout,
        }
    }

    /// Load the packet stored at sequence 0 of `target`.
    pub fn read_bootstrap(&self, target: &SessionId, handoff_id: &str) -> Result<HandoffPacket, String> {
        let head = self
            .ledger
            .read(target, 0, 1)
            .map_err(|e| format!("target session unreadable: {e}"))?;
        let Some(record) = head.into_iter().next() else {
            return Err("target session is empty".into());
        };
        if record.sequence != 0 || record.event_type() != CONTEXT_HANDOFF_PACKET {
            return Err(format!(
                "sequence {} of the target holds {}, not the handoff packet",
                record.sequence,
                record.event_type()
            ));
        }
        if record.envelope.payload_str("handoff_id") != Some(handoff_id) {
            return Err("bootstrap record belongs to another handoff".into());
        }
        let value = record
            .envelope
            .payload
            .get("packet")
            .cloned()
            .ok_or_else(|| "bootstrap record carries no packet".to_string())?;
        serde_json::from_value(value).map_err(|e| format!("stored packet unreadable: {e}"))
    }

    /// Execute all probes against the bootstrapped target. `deadline`
    /// further bounds the runner's own timeout; when it passes, outstanding
    /// probes are aborted.
    pub async fn run(
        &self,
        expected: &HandoffPacket,
        deadline: Option<Instant>,
    ) -> Result<Vec<ProbeResult>, HandoffError> {
        let ctx = Arc::new(ProbeContext {
            stored: self.read_bootstrap(&expected.target_session_id, &expected.handoff_id),
            expected: expected.clone(),
            ledger: Arc::clone(&self.ledger),
        });

        let handles: Vec<_> = self
            .probes
            .iter()
            .map(|probe| {
                let probe = Arc::clone(probe);
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move { probe.check(&ctx) })
            })
            .collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let mut limit = Instant::now() + self.timeout;
        if let Some(d) = deadline {
            limit = limit.min(d);
        }
        let joined = match tokio::time::timeout_at(limit, join_all(handles)).await {
            Ok(joined) => joined,
            Err(_) => {
                for a in &aborts {
                    a.abort();
                }
                tracing::warn!(handoff_id = %expected.handoff_id, "Continuity probes timed out");
                return Err(HandoffError::Timeout {
                    state: HandoffState::Bootstrapped,
                });
            }
        };

        let results: Vec<ProbeResult> = joined
            .into_iter()
            .zip(&self.probes)
            .map(|(outcome, probe)| {
                outcome.unwrap_or_else(|e| ProbeResult {
                    probe_category: probe.category(),
                    pass: false,
                    detail: format!("probe did not complete: {e}"),
                })
            })
            .collect();
        for r in &results {
            tracing::debug!(
                handoff_id = %expected.handoff_id,
                probe = %r.probe_category,
                pass = r.pass,
                detail = %r.detail,
                "Continuity probe"
            );
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::model::{ActorRole, Channel, DecisionEntry, EventEnvelope, OpenThread};

    fn setup() -> (Arc<EventLedger>, HandoffPacket) {
        let ledger = Arc::new(EventLedger::in_memory());
        let mission = ledger
            .append(
                EventEnvelope::new("src".into(), "lead", ActorRole::Lead, "MISSION_STATEMENT")
                    .with_id("m1"),
            )
            .map(|_| EventId::from("m1"))
            .unwrap();

        let mut packet = HandoffPacket::draft("h1", "src".into(), "dst".into(), 1);
        packet.mission_statement = "Finish".into();
        packet.mission_evidence = vec![mission.clone()];
        packet.open_threads.push(OpenThread {
            thread_id: "t1".into(),
            title: "Wire CLI".into(),
            evidence: vec![mission.clone()],
        });
        packet.decisions_log.push(DecisionEntry {
            decision: "Keep JSONL".into(),
            rationale: String::new(),
            supporting_event_ids: vec![mission],
        });
        (ledger, packet)
    }

    fn bootstrap(ledger: &EventLedger, packet: &HandoffPacket) {
        let target = packet.target_session_id.clone();
        ledger.reserve(&target, &packet.handoff_id).unwrap();
        let record = EventEnvelope::new(target.clone(), "coordinator", ActorRole::System, CONTEXT_HANDOFF_PACKET)
            .with_channel(Channel::System)
            .with_field("handoff_id", packet.handoff_id.as_str())
            .with_field("packet", serde_json::to_value(packet).unwrap());
        ledger.bootstrap(&target, &packet.handoff_id, record).unwrap();
    }

    #[tokio::test]
    async fn test_all_probes_pass_on_faithful_bootstrap() {
        let (ledger, packet) = setup();
        bootstrap(&ledger, &packet);
        let runner = ContinuityProbeRunner::new(Arc::clone(&ledger), Duration::from_secs(5));
        let results = runner.run(&packet, None).await.unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.pass), "{results:?}");
        let order: Vec<ProbeCategory> = results.iter().map(|r| r.probe_category).collect();
        assert_eq!(order, ProbeCategory::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_divergent_packet_fails_only_that_category() {
        let (ledger, packet) = setup();
        bootstrap(&ledger, &packet);
        let mut expected = packet.clone();
        expected.open_threads.push(OpenThread {
            thread_id: "t2".into(),
            title: "Lost".into(),
            evidence: vec!["m1".into()],
        });
        let runner = ContinuityProbeRunner::new(Arc::clone(&ledger), Duration::from_secs(5));
        let results = runner.run(&expected, None).await.unwrap();
        let failed: Vec<ProbeCategory> = results
            .iter()
            .filter(|r| !r.pass)
            .map(|r| r.probe_category)
            .collect();
        assert_eq!(failed, vec![ProbeCategory::Threads]);
    }

    #[tokio::test]
    async fn test_missing_bootstrap_fails_every_probe() {
        let (ledger, packet) = setup();
        let runner = ContinuityProbeRunner::new(Arc::clone(&ledger), Duration::from_secs(5));
        let results = runner.run(&packet, None).await.unwrap();
        assert!(results.iter().all(|r| !r.pass));
        assert!(results[0].detail.contains("target session"));
    }

    struct SlowProbe;

    impl ContinuityProbe for SlowProbe {
        fn category(&self) -> ProbeCategory {
            ProbeCategory::Risks
        }

        fn check(&self, _ctx: &ProbeContext) -> ProbeResult {
            std::thread::sleep(Duration::from_millis(300));
            ProbeResult {
                probe_category: ProbeCategory::Risks,
                pass: true,
                detail: "slow".into(),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_is_reported() {
        let (ledger, packet) = setup();
        bootstrap(&ledger, &packet);
        let runner = ContinuityProbeRunner::with_probes(
            Arc::clone(&ledger),
            vec![Arc::new(SlowProbe)],
            Duration::from_millis(20),
        );
        let err = runner.run(&packet, None).await.unwrap_err();
        assert!(matches!(err, HandoffError::Timeout { .. }));
    }
}
