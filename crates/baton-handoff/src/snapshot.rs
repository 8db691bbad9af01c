//! SNAPSHOTTED: read the frozen source session and turn its semantic events
//! into candidate claims, then score a draft packet for a given evidence
//! budget.

use std::collections::{BTreeSet, HashSet};

use serde_json::Value;

use baton_core::config::{BatonConfig, HandoffVocabulary};
use baton_core::model::lifecycle::{is_handoff_lifecycle, CONTEXT_HANDOFF_PACKET};
use baton_core::model::{
    ActorRole, ArtifactRef, DecisionEntry, EventId, HandoffPacket, LedgerRecord, OpenThread,
    RiskEntry, SessionId, Severity,
};
use baton_core::EventLedger;
use baton_query::{analyze_records, window_start, Anomaly};

use crate::error::HandoffError;

/// Every claim the source history supports, each with all of its evidence
/// in sequence order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
    pub mission: Option<(String, Vec<EventId>)>,
    pub threads: Vec<OpenThread>,
    pub decisions: Vec<DecisionEntry>,
    pub artifacts: Vec<ArtifactRef>,
    pub risks: Vec<RiskEntry>,
}

impl Candidates {
    pub fn claim_count(&self) -> usize {
        usize::from(self.mission.is_some())
            + self.threads.len()
            + self.decisions.len()
            + self.artifacts.len()
            + self.risks.len()
    }
}

/// Consistent view of a frozen source session.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub source: SessionId,
    /// Records below this sequence are covered.
    pub snapshot_sequence: u64,
    /// Source records without the coordinator's own lifecycle events.
    pub records: Vec<LedgerRecord>,
    pub candidates: Candidates,
    pub health_score: f64,
}

/// A packet draft for one evidence budget, before unsupported claims are dropped.
#[derive(Debug, Clone)]
pub struct Draft {
    pub packet: HandoffPacket,
    pub evidence_budget: usize,
    pub candidate_claims: usize,
    pub supported_claims: usize,
    /// Distinct cited ids that resolve in the ledger over all distinct cited ids.
    pub resolution_ratio: f64,
}

impl Snapshot {
    pub fn take(
        ledger: &EventLedger,
        source: &SessionId,
        snapshot_sequence: u64,
        config: &BatonConfig,
    ) -> Result<Self, HandoffError> {
        let records: Vec<LedgerRecord> = ledger
            .read_all(source)?
            .into_iter()
            .filter(|r| r.sequence < snapshot_sequence && !is_handoff_lifecycle(r.event_type()))
            .collect();

        let start = window_start(&records, config.analysis.window_events, &config.scoring);
        let analysis = analyze_records(
            source,
            &records[start..],
            &config.scoring,
            config.analysis.top_n,
        );
        let candidates =
            extract_candidates(&records, &config.handoff.vocabulary, &analysis.anomalies);

        tracing::debug!(
            session_id = %source,
            snapshot_sequence,
            records = records.len(),
            claims = candidates.claim_count(),
            health = analysis.health_score,
            "Snapshot taken"
        );
        Ok(Self {
            source: source.clone(),
            snapshot_sequence,
            records,
            candidates,
            health_score: analysis.health_score,
        })
    }

    /// Restrict citations to the `budget` most recent source records and
    /// score the result. Citations of records outside the source session
    /// are not subject to the budget; they are checked with `resolves`.
    pub fn draft(
        &self,
        handoff_id: &str,
        target: &SessionId,
        budget: usize,
        resolves: impl Fn(&EventId) -> bool,
    ) -> Draft {
        let source_ids: HashSet<&EventId> = self.records.iter().map(|r| r.event_id()).collect();
        let mut eligible: HashSet<&EventId> = self
            .records
            .iter()
            .rev()
            .take(budget)
            .map(|r| r.event_id())
            .collect();
        if let Some(first) = self.records.first() {
            if first.event_type() == CONTEXT_HANDOFF_PACKET {
                eligible.insert(first.event_id());
            }
        }
        let keep = |ids: &[EventId]| -> Vec<EventId> {
            ids.iter()
                .filter(|id| !source_ids.contains(id) || eligible.contains(id))
                .cloned()
                .collect()
        };

        let c = &self.candidates;
        let mut packet = HandoffPacket::draft(
            handoff_id,
            self.source.clone(),
            target.clone(),
            self.snapshot_sequence,
        );
        if let Some((statement, evidence)) = &c.mission {
            packet.mission_statement = statement.clone();
            packet.mission_evidence = keep(evidence);
        }
        packet.open_threads = c
            .threads
            .iter()
            .map(|t| OpenThread {
                evidence: keep(&t.evidence),
                ..t.clone()
            })
            .collect();
        packet.decisions_log = c
            .decisions
            .iter()
            .map(|d| DecisionEntry {
                supporting_event_ids: keep(&d.supporting_event_ids),
                ..d.clone()
            })
            .collect();
        packet.artifacts_refs = c
            .artifacts
            .iter()
            .map(|a| ArtifactRef {
                evidence: keep(&a.evidence),
                ..a.clone()
            })
            .collect();
        packet.risks = c
            .risks
            .iter()
            .map(|r| RiskEntry {
                evidence: keep(&r.evidence),
                ..r.clone()
            })
            .collect();

        let supported_claims = usize::from(c.mission.is_some() && !packet.mission_evidence.is_empty())
            + packet.open_threads.iter().filter(|t| !t.evidence.is_empty()).count()
            + packet
                .decisions_log
                .iter()
                .filter(|d| !d.supporting_event_ids.is_empty())
                .count()
            + packet.artifacts_refs.iter().filter(|a| !a.evidence.is_empty()).count()
            + packet.risks.iter().filter(|r| !r.evidence.is_empty()).count();
        let candidate_claims = c.claim_count();

        let cited: BTreeSet<&EventId> = packet.cited_event_ids().collect();
        let resolved = cited
            .iter()
            .filter(|id| source_ids.contains(**id) || resolves(**id))
            .count();
        let resolution_ratio = if cited.is_empty() {
            0.0
        } else {
            resolved as f64 / cited.len() as f64
        };

        packet.coverage_score = if candidate_claims == 0 {
            0.0
        } else {
            supported_claims as f64 / candidate_claims as f64
        };
        packet.confidence_score =
            resolution_ratio * (0.5 + 0.5 * self.health_score.clamp(0.0, 100.0) / 100.0);

        Draft {
            packet,
            evidence_budget: budget,
            candidate_claims,
            supported_claims,
            resolution_ratio,
        }
    }
}

/// Fold the semantic events of a session into candidate claims.
///
/// A packet record at the head of the session seeds the candidates with
/// what the previous window handed over, cited by that record. High
/// severity analytics findings become risks citing their evidence.
pub fn extract_candidates(
    records: &[LedgerRecord],
    vocab: &HandoffVocabulary,
    anomalies: &[Anomaly],
) -> Candidates {
    let mut c = Candidates::default();
    let mut inherited_mission = None;

    if let Some(head) = records.first().filter(|r| r.event_type() == CONTEXT_HANDOFF_PACKET) {
        match head
            .envelope
            .payload
            .get("packet")
            .cloned()
            .map(serde_json::from_value::<HandoffPacket>)
        {
            Some(Ok(inherited)) => {
                let cite = vec![head.event_id().clone()];
                if !inherited.mission_statement.is_empty() {
                    inherited_mission = Some((inherited.mission_statement.clone(), cite.clone()));
                }
                c.threads = inherited
                    .open_threads
                    .into_iter()
                    .map(|t| OpenThread {
                        evidence: cite.clone(),
                        ..t
                    })
                    .collect();
                c.decisions = inherited
                    .decisions_log
                    .into_iter()
                    .map(|d| DecisionEntry {
                        supporting_event_ids: cite.clone(),
                        ..d
                    })
                    .collect();
                c.artifacts = inherited
                    .artifacts_refs
                    .into_iter()
                    .map(|a| ArtifactRef {
                        evidence: cite.clone(),
                        ..a
                    })
                    .collect();
                c.risks = inherited
                    .risks
                    .into_iter()
                    .map(|r| RiskEntry {
                        evidence: cite.clone(),
                        ..r
                    })
                    .collect();
            }
            Some(Err(e)) => {
                tracing::warn!(event_id = %head.event_id(), "Unreadable inherited packet: {e}")
            }
            None => {}
        }
    }

    let mut explicit_mission = None;
    let mut first_user_message = None;

    for record in records {
        let env = &record.envelope;
        let id = record.event_id();
        let t = env.event_type.as_str();

        if t == vocab.mission {
            if let Some(statement) = text(record, &["statement", "mission", "message"]) {
                explicit_mission = Some((statement, vec![id.clone()]));
            }
        } else if t == vocab.thread_opened {
            let thread_id = key(record, "thread_id");
            let title = text(record, &["title", "summary"]).unwrap_or_else(|| thread_id.clone());
            match c.threads.iter_mut().find(|th| th.thread_id == thread_id) {
                Some(existing) => {
                    existing.title = title;
                    existing.evidence.push(id.clone());
                }
                None => c.threads.push(OpenThread {
                    thread_id,
                    title,
                    evidence: vec![id.clone()],
                }),
            }
        } else if t == vocab.thread_updated {
            let thread_id = key(record, "thread_id");
            if let Some(existing) = c.threads.iter_mut().find(|th| th.thread_id == thread_id) {
                existing.evidence.push(id.clone());
            }
        } else if t == vocab.thread_resolved {
            let thread_id = key(record, "thread_id");
            c.threads.retain(|th| th.thread_id != thread_id);
        } else if t == vocab.decision {
            let Some(decision) = text(record, &["decision", "summary"]) else {
                tracing::warn!(event_id = %id, "Decision event without decision text skipped");
                continue;
            };
            let mut supporting = vec![id.clone()];
            for cited in id_list(record, "supporting_event_ids") {
                if !supporting.contains(&cited) {
                    supporting.push(cited);
                }
            }
            c.decisions.push(DecisionEntry {
                decision,
                rationale: text(record, &["rationale", "reason"]).unwrap_or_default(),
                supporting_event_ids: supporting,
            });
        } else if vocab.artifact.iter().any(|a| a == t) {
            let artifact_id = key(record, "artifact_id");
            match c.artifacts.iter_mut().find(|a| a.artifact_id == artifact_id) {
                Some(existing) => existing.evidence.push(id.clone()),
                None => c.artifacts.push(ArtifactRef {
                    artifact_id,
                    evidence: vec![id.clone()],
                }),
            }
        } else if t == vocab.risk_identified {
            let risk_id = key(record, "risk_id");
            let risk = text(record, &["risk", "description"]).unwrap_or_else(|| risk_id.clone());
            let severity = env
                .payload_str("severity")
                .and_then(Severity::parse_loose)
                .unwrap_or(Severity::Medium);
            let mitigation = text(record, &["mitigation"]);
            match c.risks.iter_mut().find(|r| r.risk_id == risk_id) {
                Some(existing) => {
                    existing.risk = risk;
                    existing.severity = severity;
                    existing.mitigation = mitigation.or(existing.mitigation.take());
                    existing.evidence.push(id.clone());
                }
                None => c.risks.push(RiskEntry {
                    risk_id,
                    risk,
                    severity,
                    mitigation,
                    evidence: vec![id.clone()],
                }),
            }
        } else if t == vocab.risk_mitigated {
            let risk_id = key(record, "risk_id");
            if let Some(existing) = c.risks.iter_mut().find(|r| r.risk_id == risk_id) {
                if let Some(m) = text(record, &["mitigation"]) {
                    existing.mitigation = Some(m);
                }
                existing.evidence.push(id.clone());
            }
        } else if env.actor_role == ActorRole::User && first_user_message.is_none() {
            if let Some(message) = text(record, &["message", "text"]) {
                first_user_message = Some((message, vec![id.clone()]));
            }
        }
    }

    c.mission = explicit_mission.or(inherited_mission).or(first_user_message);

    for anomaly in anomalies.iter().filter(|a| a.severity == Severity::High) {
        if anomaly.evidence.is_empty() {
            continue;
        }
        let risk_id = format!("anomaly:{}", anomaly.code.as_str());
        if c.risks.iter().any(|r| r.risk_id == risk_id) {
            continue;
        }
        c.risks.push(RiskEntry {
            risk_id,
            risk: anomaly
                .detail
                .clone()
                .unwrap_or_else(|| anomaly.code.as_str().to_string()),
            severity: Severity::High,
            mitigation: None,
            evidence: anomaly.evidence.clone(),
        });
    }
    c
}

/// First non-empty string among `keys` in the payload.
fn text(record: &LedgerRecord, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| record.envelope.payload_str(k))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Identifier field of a semantic event; falls back to the event id.
fn key(record: &LedgerRecord, field: &str) -> String {
    text(record, &[field]).unwrap_or_else(|| record.event_id().to_string())
}

fn id_list(record: &LedgerRecord, field: &str) -> Vec<EventId> {
    match record.envelope.payload.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(EventId::from)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![EventId::from(s.as_str())],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::model::EventEnvelope;
    use serde_json::json;

    fn rec(seq: u64, role: ActorRole, event_type: &str, payload: Value) -> LedgerRecord {
        let map = payload.as_object().cloned().unwrap_or_default();
        LedgerRecord {
            sequence: seq,
            envelope: EventEnvelope::new("src".into(), "agent", role, event_type)
                .with_id(format!("e{seq}"))
                .with_payload(map),
        }
    }

    fn history() -> Vec<LedgerRecord> {
        vec![
            rec(0, ActorRole::User, "USER_MESSAGE", json!({"message": "Build the importer"})),
            rec(1, ActorRole::Lead, "THREAD_OPENED", json!({"thread_id": "t1", "title": "Parse CSV"})),
            rec(2, ActorRole::Lead, "THREAD_OPENED", json!({"thread_id": "t2", "title": "Write docs"})),
            rec(3, ActorRole::Worker, "THREAD_UPDATED", json!({"thread_id": "t1"})),
            rec(4, ActorRole::Worker, "THREAD_RESOLVED", json!({"thread_id": "t2"})),
            rec(
                5,
                ActorRole::Lead,
                "DECISION_RECORDED",
                json!({"decision": "Use serde", "rationale": "derive", "supporting_event_ids": ["e1", "x9"]}),
            ),
            rec(6, ActorRole::Worker, "ARTIFACT_CREATED", json!({"artifact_id": "src/csv.rs"})),
            rec(7, ActorRole::Auditor, "RISK_IDENTIFIED", json!({"risk_id": "r1", "risk": "Large files", "severity": "high"})),
            rec(8, ActorRole::Auditor, "RISK_MITIGATED", json!({"risk_id": "r1", "mitigation": "Stream rows"})),
            rec(9, ActorRole::Lead, "DECISION_RECORDED", json!({"rationale": "no text"})),
        ]
    }

    #[test]
    fn test_extraction_folds_semantic_events() {
        let c = extract_candidates(&history(), &HandoffVocabulary::default(), &[]);
        let (mission, evidence) = c.mission.clone().unwrap();
        assert_eq!(mission, "Build the importer");
        assert_eq!(evidence, vec![EventId::from("e0")]);

        assert_eq!(c.threads.len(), 1);
        assert_eq!(c.threads[0].thread_id, "t1");
        assert_eq!(c.threads[0].evidence, vec![EventId::from("e1"), EventId::from("e3")]);

        assert_eq!(c.decisions.len(), 1);
        assert_eq!(
            c.decisions[0].supporting_event_ids,
            vec![EventId::from("e5"), EventId::from("e1"), EventId::from("x9")]
        );
        assert_eq!(c.artifacts[0].artifact_id, "src/csv.rs");
        assert_eq!(c.risks[0].mitigation.as_deref(), Some("Stream rows"));
        assert_eq!(c.risks[0].severity, Severity::High);
        assert_eq!(c.claim_count(), 5);
    }

    #[test]
    fn test_explicit_mission_wins_over_user_message() {
        let mut records = history();
        records.push(rec(10, ActorRole::Lead, "MISSION_STATEMENT", json!({"statement": "Ship v1 importer"})));
        let c = extract_candidates(&records, &HandoffVocabulary::default(), &[]);
        assert_eq!(c.mission.unwrap().0, "Ship v1 importer");
    }

    #[test]
    fn test_draft_budget_and_foreign_citations() {
        let records = history();
        let snapshot = Snapshot {
            source: "src".into(),
            snapshot_sequence: 10,
            candidates: extract_candidates(&records, &HandoffVocabulary::default(), &[]),
            records,
            health_score: 100.0,
        };

        let full = snapshot.draft("h", &"dst".into(), 100, |_| false);
        assert_eq!(full.supported_claims, 5);
        assert_eq!(full.packet.coverage_score, 1.0);
        // x9 is foreign and does not resolve.
        assert!(full.resolution_ratio < 1.0);
        assert!(full.packet.confidence_score < 1.0);

        let narrow = snapshot.draft("h", &"dst".into(), 4, |_| true);
        // Records e6..e9 are in scope: mission (e0) and thread t1 (e1, e3) lose support.
        assert!(narrow.packet.mission_evidence.is_empty());
        assert!(narrow.packet.open_threads[0].evidence.is_empty());
        // The decision keeps its foreign citation.
        assert_eq!(narrow.packet.decisions_log[0].supporting_event_ids, vec![EventId::from("x9")]);
        assert_eq!(narrow.supported_claims, 3);
        assert!((narrow.packet.coverage_score - 0.6).abs() < 1e-12);
        assert_eq!(narrow.resolution_ratio, 1.0);
    }

    #[test]
    fn test_inherited_packet_seeds_candidates() {
        let mut inherited = HandoffPacket::draft("h0", "a".into(), "src".into(), 3);
        inherited.mission_statement = "Keep going".into();
        inherited.open_threads.push(OpenThread {
            thread_id: "t9".into(),
            title: "Carry me".into(),
            evidence: vec!["old".into()],
        });
        let head = rec(
            0,
            ActorRole::System,
            CONTEXT_HANDOFF_PACKET,
            json!({ "packet": serde_json::to_value(&inherited).unwrap() }),
        );
        let c = extract_candidates(&[head], &HandoffVocabulary::default(), &[]);
        assert_eq!(c.mission.unwrap(), ("Keep going".to_string(), vec![EventId::from("e0")]));
        assert_eq!(c.threads[0].evidence, vec![EventId::from("e0")]);
    }
}
