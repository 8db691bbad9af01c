use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use baton_core::model::{EventId, HandoffPacket};

/// One broken packet invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub reason: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Schema and invariant checks for a packet. `resolves` reports whether a
/// cited event exists in the ledger. Returns every violation found.
pub fn validate_packet(
    packet: &HandoffPacket,
    resolves: impl Fn(&EventId) -> bool,
) -> Vec<Violation> {
    let mut out = Vec::new();
    let mut fail = |field: String, reason: &str| {
        out.push(Violation {
            field,
            reason: reason.to_string(),
        })
    };

    if packet.handoff_id.trim().is_empty() {
        fail("handoff_id".into(), "must not be empty");
    }
    if packet.source_session_id == packet.target_session_id {
        fail("target_session_id".into(), "must differ from the source session");
    }
    if packet.mission_statement.trim().is_empty() {
        fail("mission_statement".into(), "missing");
    } else if packet.mission_evidence.is_empty() {
        fail("mission_evidence".into(), "mission cites no event");
    }

    let mut thread_ids = HashSet::new();
    for (i, t) in packet.open_threads.iter().enumerate() {
        if t.thread_id.trim().is_empty() {
            fail(format!("open_threads[{i}].thread_id"), "must not be empty");
        } else if !thread_ids.insert(t.thread_id.as_str()) {
            fail(format!("open_threads[{i}].thread_id"), "duplicate thread id");
        }
        if t.evidence.is_empty() {
            fail(format!("open_threads[{i}].evidence"), "thread cites no event");
        }
    }
    for (i, d) in packet.decisions_log.iter().enumerate() {
        if d.decision.trim().is_empty() {
            fail(format!("decisions_log[{i}].decision"), "must not be empty");
        }
        if d.supporting_event_ids.is_empty() {
            fail(
                format!("decisions_log[{i}].supporting_event_ids"),
                "decision cites no supporting event",
            );
        }
    }
    for (i, a) in packet.artifacts_refs.iter().enumerate() {
        if a.artifact_id.trim().is_empty() {
            fail(format!("artifacts_refs[{i}].artifact_id"), "must not be empty");
        }
        if a.evidence.is_empty() {
            fail(format!("artifacts_refs[{i}].evidence"), "artifact cites no event");
        }
    }
    for (i, r) in packet.risks.iter().enumerate() {
        if r.risk.trim().is_empty() {
            fail(format!("risks[{i}].risk"), "must not be empty");
        }
        if r.evidence.is_empty() {
            fail(format!("risks[{i}].evidence"), "risk cites no event");
        }
    }

    for (field, score) in [
        ("coverage_score", packet.coverage_score),
        ("confidence_score", packet.confidence_score),
    ] {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            fail(field.into(), "must be within [0, 1]");
        }
    }

    let mut seen = HashSet::new();
    for id in packet.cited_event_ids() {
        if seen.insert(id) && !resolves(id) {
            fail("evidence".into(), &format!("cited event {id} is not in the ledger"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::model::{DecisionEntry, OpenThread};

    fn valid() -> HandoffPacket {
        let mut p = HandoffPacket::draft("h1", "a".into(), "b".into(), 4);
        p.mission_statement = "Ship it".into();
        p.mission_evidence = vec!["e0".into()];
        p.open_threads.push(OpenThread {
            thread_id: "t1".into(),
            title: "Tests".into(),
            evidence: vec!["e1".into()],
        });
        p.decisions_log.push(DecisionEntry {
            decision: "Use tokio".into(),
            rationale: "async probes".into(),
            supporting_event_ids: vec!["e2".into()],
        });
        p.coverage_score = 1.0;
        p.confidence_score = 0.9;
        p
    }

    #[test]
    fn test_valid_packet_passes() {
        assert!(validate_packet(&valid(), |_| true).is_empty());
    }

    #[test]
    fn test_decision_without_support_fails() {
        let mut p = valid();
        p.decisions_log[0].supporting_event_ids.clear();
        let violations = validate_packet(&p, |_| true);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "decisions_log[0].supporting_event_ids");
    }

    #[test]
    fn test_missing_mission_and_dangling_evidence() {
        let mut p = valid();
        p.mission_statement.clear();
        p.mission_evidence.clear();
        p.open_threads.push(p.open_threads[0].clone());
        let violations = validate_packet(&p, |id| id.as_str() != "e2");
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["mission_statement", "open_threads[1].thread_id", "evidence"]);
        assert!(violations[2].reason.contains("e2"));
    }
}
