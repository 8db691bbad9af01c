use baton_core::model::{EventId, HandoffPacket};

/// Claims removed from a packet, as `section:key` labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dropped(pub Vec<String>);

impl Dropped {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// COMPRESSED: keep only claims that cite evidence, and at most
/// `max_evidence` citations per claim (the originating event plus the most
/// recent ones). Citations `resolves` rejects are removed first; a claim
/// left without any is dropped whole, never summarized.
pub fn compress(
    packet: &mut HandoffPacket,
    max_evidence: usize,
    resolves: impl Fn(&EventId) -> bool,
) -> Dropped {
    let mut dropped = Vec::new();

    let mut supported = |evidence: &mut Vec<EventId>, section: &str, key: &str| -> bool {
        evidence.retain(|id| {
            let ok = resolves(id);
            if !ok {
                dropped.push(format!("{section}:{key}:evidence:{id}"));
            }
            ok
        });
        cap(evidence, max_evidence);
        if evidence.is_empty() {
            dropped.push(format!("{section}:{key}"));
            false
        } else {
            true
        }
    };

    if !packet.mission_statement.is_empty()
        && !supported(&mut packet.mission_evidence, "mission", "statement")
    {
        packet.mission_statement.clear();
    }
    packet
        .open_threads
        .retain_mut(|t| supported(&mut t.evidence, "thread", &t.thread_id));
    packet
        .decisions_log
        .retain_mut(|d| supported(&mut d.supporting_event_ids, "decision", &d.decision));
    packet
        .artifacts_refs
        .retain_mut(|a| supported(&mut a.evidence, "artifact", &a.artifact_id));
    packet
        .risks
        .retain_mut(|r| supported(&mut r.evidence, "risk", &r.risk_id));

    if !dropped.is_empty() {
        tracing::debug!(
            handoff_id = %packet.handoff_id,
            dropped = dropped.len(),
            "Dropped unsupported claims"
        );
    }
    Dropped(dropped)
}

fn cap(evidence: &mut Vec<EventId>, max: usize) {
    if max == 0 || evidence.len() <= max {
        return;
    }
    let tail = evidence.split_off(evidence.len() - (max - 1));
    evidence.truncate(1);
    evidence.extend(tail);
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::model::{DecisionEntry, OpenThread};

    #[test]
    fn test_unsupported_claims_are_dropped() {
        let mut p = HandoffPacket::draft("h", "a".into(), "b".into(), 3);
        p.mission_statement = "Goal".into();
        p.open_threads.push(OpenThread {
            thread_id: "t1".into(),
            title: "kept".into(),
            evidence: vec!["e1".into()],
        });
        p.open_threads.push(OpenThread {
            thread_id: "t2".into(),
            title: "gone".into(),
            evidence: vec![],
        });
        p.decisions_log.push(DecisionEntry {
            decision: "Use X".into(),
            rationale: String::new(),
            supporting_event_ids: vec![],
        });

        let dropped = compress(&mut p, 4, |_| true);
        assert_eq!(
            dropped.0,
            vec!["mission:statement", "thread:t2", "decision:Use X"]
        );
        assert!(p.mission_statement.is_empty());
        assert_eq!(p.open_threads.len(), 1);
        assert!(p.decisions_log.is_empty());
    }

    #[test]
    fn test_unresolved_citations_are_removed_before_claims() {
        let mut p = HandoffPacket::draft("h", "a".into(), "b".into(), 3);
        p.decisions_log.push(DecisionEntry {
            decision: "Use X".into(),
            rationale: String::new(),
            supporting_event_ids: vec!["e1".into(), "evt_typo".into()],
        });
        p.decisions_log.push(DecisionEntry {
            decision: "Use Y".into(),
            rationale: String::new(),
            supporting_event_ids: vec!["evt_typo".into()],
        });

        let dropped = compress(&mut p, 4, |id| id.as_str() != "evt_typo");
        assert_eq!(
            dropped.0,
            vec![
                "decision:Use X:evidence:evt_typo",
                "decision:Use Y:evidence:evt_typo",
                "decision:Use Y",
            ]
        );
        assert_eq!(p.decisions_log.len(), 1);
        assert_eq!(p.decisions_log[0].supporting_event_ids, vec![EventId::from("e1")]);
    }

    #[test]
    fn test_evidence_cap_keeps_origin_and_latest() {
        let mut ids: Vec<EventId> = (0..6).map(|i| EventId::from(format!("e{i}"))).collect();
        cap(&mut ids, 3);
        let got: Vec<&str> = ids.iter().map(|e| e.as_str()).collect();
        assert_eq!(got, vec!["e0", "e4", "e5"]);

        let mut one: Vec<EventId> = (0..3).map(|i| EventId::from(format!("e{i}"))).collect();
        cap(&mut one, 1);
        assert_eq!(one, vec![EventId::from("e0")]);
    }
}
