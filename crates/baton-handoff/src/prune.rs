//! PRUNED: topology-aware pruning.
//!
//! Cited events are joined into components through `parent_event_id` links
//! and shared trace ids. Mission, thread and decision evidence anchor the
//! packet; artifacts and risks with no path to an anchor are dropped when
//! they are also low relevance. Oversized sections lose their least
//! connected items first.

use std::collections::{HashMap, HashSet};

use baton_core::model::{EventId, HandoffPacket, LedgerRecord, Severity};

use crate::compress::Dropped;

/// Ancestor hops followed per cited event.
const MAX_PARENT_HOPS: usize = 32;

#[derive(Debug, Default)]
struct UnionFind {
    ids: HashMap<String, usize>,
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn node(&mut self, key: &str) -> usize {
        if let Some(&i) = self.ids.get(key) {
            return i;
        }
        let i = self.parent.len();
        self.parent.push(i);
        self.size.push(1);
        self.ids.insert(key.to_string(), i);
        i
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] { (ra, rb) } else { (rb, ra) };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }

    fn root_of(&mut self, key: &str) -> Option<usize> {
        let i = *self.ids.get(key)?;
        Some(self.find(i))
    }
}

/// Causal structure of the cited events.
pub struct Topology {
    uf: UnionFind,
    /// Cited events per component root.
    weight: HashMap<usize, usize>,
}

impl Topology {
    /// Build components over every id cited by `packet`. `records` are the
    /// source records; a trace equal to the session id is the session-wide
    /// default and links nothing.
    pub fn build(packet: &HandoffPacket, records: &[LedgerRecord]) -> Self {
        let by_id: HashMap<&EventId, &LedgerRecord> =
            records.iter().map(|r| (r.event_id(), r)).collect();
        let mut uf = UnionFind::default();
        let cited: HashSet<&EventId> = packet.cited_event_ids().collect();

        for id in &cited {
            let node = uf.node(id.as_str());
            let Some(record) = by_id.get(*id) else {
                continue;
            };
            let trace = &record.envelope.trace_id;
            if trace != record.envelope.session_id.as_str() {
                let t = uf.node(&format!("trace:{trace}"));
                uf.union(node, t);
            }
            let mut current = *record;
            for _ in 0..MAX_PARENT_HOPS {
                let Some(parent) = &current.envelope.parent_event_id else {
                    break;
                };
                let p = uf.node(parent.as_str());
                uf.union(node, p);
                match by_id.get(parent) {
                    Some(next) => current = *next,
                    None => break,
                }
            }
        }

        let mut weight = HashMap::new();
        for id in &cited {
            if let Some(root) = uf.root_of(id.as_str()) {
                *weight.entry(root).or_insert(0) += 1;
            }
        }
        Self { uf, weight }
    }

    fn roots(&mut self, evidence: &[EventId]) -> HashSet<usize> {
        evidence
            .iter()
            .filter_map(|id| self.uf.root_of(id.as_str()))
            .collect()
    }

    /// Cited events sharing a component with any of `evidence`.
    pub fn connectivity(&mut self, evidence: &[EventId]) -> usize {
        self.roots(evidence)
            .iter()
            .map(|r| self.weight.get(r).copied().unwrap_or(0))
            .sum()
    }
}

/// Apply topology-aware pruning in place.
pub fn prune(packet: &mut HandoffPacket, records: &[LedgerRecord], max_items: usize) -> Dropped {
    let mut topo = Topology::build(packet, records);
    let mut anchors: HashSet<usize> = topo.roots(&packet.mission_evidence);
    for t in &packet.open_threads {
        anchors.extend(topo.roots(&t.evidence));
    }
    for d in &packet.decisions_log {
        anchors.extend(topo.roots(&d.supporting_event_ids));
    }

    let mut dropped = Vec::new();
    packet.artifacts_refs.retain(|a| {
        let attached = !topo.roots(&a.evidence).is_disjoint(&anchors);
        let keep = attached || a.evidence.len() > 1;
        if !keep {
            dropped.push(format!("artifact:{}", a.artifact_id));
        }
        keep
    });
    packet.risks.retain(|r| {
        let attached = !topo.roots(&r.evidence).is_disjoint(&anchors);
        let keep = attached || r.severity > Severity::Low;
        if !keep {
            dropped.push(format!("risk:{}", r.risk_id));
        }
        keep
    });

    if max_items > 0 {
        cap_section(&mut packet.open_threads, max_items, &mut dropped, |t| {
            (topo.connectivity(&t.evidence), format!("thread:{}", t.thread_id))
        });
        cap_section(&mut packet.decisions_log, max_items, &mut dropped, |d| {
            (topo.connectivity(&d.supporting_event_ids), format!("decision:{}", d.decision))
        });
        cap_section(&mut packet.artifacts_refs, max_items, &mut dropped, |a| {
            (topo.connectivity(&a.evidence), format!("artifact:{}", a.artifact_id))
        });
        cap_section(&mut packet.risks, max_items, &mut dropped, |r| {
            (topo.connectivity(&r.evidence), format!("risk:{}", r.risk_id))
        });
    }

    if !dropped.is_empty() {
        tracing::debug!(
            handoff_id = %packet.handoff_id,
            dropped = dropped.len(),
            "Pruned disconnected or excess items"
        );
    }
    Dropped(dropped)
}

/// Keep the `max` best connected items, preserving their original order.
/// Ties keep the earlier item.
fn cap_section<T>(
    items: &mut Vec<T>,
    max: usize,
    dropped: &mut Vec<String>,
    mut score: impl FnMut(&T) -> (usize, String),
) {
    if items.len() <= max {
        return;
    }
    let scored: Vec<(usize, String)> = items.iter().map(&mut score).collect();
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| scored[b].0.cmp(&scored[a].0).then(a.cmp(&b)));
    let keep: HashSet<usize> = order.into_iter().take(max).collect();

    let mut index = 0;
    items.retain(|_| {
        let kept = keep.contains(&index);
        if !kept {
            dropped.push(scored[index].1.clone());
        }
        index += 1;
        kept
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::model::{
        ActorRole, ArtifactRef, DecisionEntry, EventEnvelope, OpenThread, RiskEntry,
    };

    fn rec(seq: u64, id: &str, parent: Option<&str>) -> LedgerRecord {
        LedgerRecord {
            sequence: seq,
            envelope: EventEnvelope::new("s".into(), "a", ActorRole::Worker, "STEP")
                .with_id(id)
                .with_parent(parent.map(EventId::from)),
        }
    }

    fn packet() -> HandoffPacket {
        let mut p = HandoffPacket::draft("h", "s".into(), "t".into(), 6);
        p.mission_statement = "Goal".into();
        p.mission_evidence = vec!["m".into()];
        p.decisions_log.push(DecisionEntry {
            decision: "D".into(),
            rationale: String::new(),
            supporting_event_ids: vec!["d".into()],
        });
        p
    }

    #[test]
    fn test_disconnected_low_relevance_items_are_dropped() {
        let records = vec![
            rec(0, "m", None),
            rec(1, "d", Some("m")),
            rec(2, "a1", Some("d")),
            rec(3, "a2", None),
            rec(4, "r1", None),
            rec(5, "r2", None),
        ];
        let mut p = packet();
        p.artifacts_refs = vec![
            ArtifactRef { artifact_id: "linked".into(), evidence: vec!["a1".into()] },
            ArtifactRef { artifact_id: "orphan".into(), evidence: vec!["a2".into()] },
        ];
        p.risks = vec![
            RiskEntry {
                risk_id: "minor".into(),
                risk: "x".into(),
                severity: Severity::Low,
                mitigation: None,
                evidence: vec!["r1".into()],
            },
            RiskEntry {
                risk_id: "major".into(),
                risk: "y".into(),
                severity: Severity::High,
                mitigation: None,
                evidence: vec!["r2".into()],
            },
        ];

        let dropped = prune(&mut p, &records, 50);
        assert_eq!(dropped.0, vec!["artifact:orphan", "risk:minor"]);
        assert_eq!(p.artifacts_refs[0].artifact_id, "linked");
        assert_eq!(p.risks[0].risk_id, "major");
    }

    #[test]
    fn test_section_cap_drops_least_connected() {
        let records = vec![
            rec(0, "m", None),
            rec(1, "d", None),
            rec(2, "x1", Some("m")),
            rec(3, "x2", None),
            rec(4, "x3", Some("m")),
        ];
        let mut p = packet();
        p.open_threads = ["x1", "x2", "x3"]
            .iter()
            .map(|id| OpenThread {
                thread_id: id.to_string(),
                title: id.to_string(),
                evidence: vec![EventId::from(*id)],
            })
            .collect();

        let dropped = prune(&mut p, &records, 2);
        assert_eq!(dropped.0, vec!["thread:x2"]);
        let kept: Vec<&str> = p.open_threads.iter().map(|t| t.thread_id.as_str()).collect();
        assert_eq!(kept, vec!["x1", "x3"]);
    }

    #[test]
    fn test_shared_trace_connects() {
        let mut linked = rec(0, "m", None);
        linked.envelope.trace_id = "feature-7".into();
        let mut other = rec(1, "a", None);
        other.envelope.trace_id = "feature-7".into();
        let mut p = packet();
        p.decisions_log.clear();
        p.artifacts_refs.push(ArtifactRef { artifact_id: "f".into(), evidence: vec!["a".into()] });
        let dropped = prune(&mut p, &[linked, other], 10);
        assert!(dropped.is_empty());
        assert_eq!(p.artifacts_refs.len(), 1);
    }
}
