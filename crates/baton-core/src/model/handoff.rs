use serde::{Deserialize, Serialize};

use super::event::{EventId, SessionId};
use super::severity::Severity;

/// An unresolved work item carried across a handoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenThread {
    pub thread_id: String,
    pub title: String,
    #[serde(default)]
    pub evidence: Vec<EventId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub decision: String,
    pub rationale: String,
    #[serde(default)]
    pub supporting_event_ids: Vec<EventId>,
}

/// An external artifact (file, output) relevant to continuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub artifact_id: String,
    #[serde(default)]
    pub evidence: Vec<EventId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEntry {
    pub risk_id: String,
    pub risk: String,
    pub severity: Severity,
    pub mitigation: Option<String>,
    #[serde(default)]
    pub evidence: Vec<EventId>,
}

/// Continuity categories, one probe each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeCategory {
    Mission,
    Threads,
    Decisions,
    Artifacts,
    Risks,
}

impl ProbeCategory {
    pub const ALL: [ProbeCategory; 5] = [
        ProbeCategory::Mission,
        ProbeCategory::Threads,
        ProbeCategory::Decisions,
        ProbeCategory::Artifacts,
        ProbeCategory::Risks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeCategory::Mission => "mission",
            ProbeCategory::Threads => "threads",
            ProbeCategory::Decisions => "decisions",
            ProbeCategory::Artifacts => "artifacts",
            ProbeCategory::Risks => "risks",
        }
    }
}

impl std::fmt::Display for ProbeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub probe_category: ProbeCategory,
    pub pass: bool,
    pub detail: String,
}

/// The artifact produced by one context-window transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffPacket {
    pub handoff_id: String,
    pub source_session_id: SessionId,
    pub target_session_id: SessionId,
    /// Source records with a sequence below this value were snapshotted.
    pub snapshot_sequence: u64,
    pub mission_statement: String,
    #[serde(default)]
    pub mission_evidence: Vec<EventId>,
    #[serde(default)]
    pub open_threads: Vec<OpenThread>,
    #[serde(default)]
    pub decisions_log: Vec<DecisionEntry>,
    #[serde(default)]
    pub artifacts_refs: Vec<ArtifactRef>,
    #[serde(default)]
    pub risks: Vec<RiskEntry>,
    pub coverage_score: f64,
    pub confidence_score: f64,
    pub invariants_passed: bool,
    #[serde(default)]
    pub continuity_probe_results: Vec<ProbeResult>,
}

impl HandoffPacket {
    /// Empty draft for a source/target pair.
    pub fn draft(
        handoff_id: impl Into<String>,
        source: SessionId,
        target: SessionId,
        snapshot_sequence: u64,
    ) -> Self {
        Self {
            handoff_id: handoff_id.into(),
            source_session_id: source,
            target_session_id: target,
            snapshot_sequence,
            mission_statement: String::new(),
            mission_evidence: Vec::new(),
            open_threads: Vec::new(),
            decisions_log: Vec::new(),
            artifacts_refs: Vec::new(),
            risks: Vec::new(),
            coverage_score: 0.0,
            confidence_score: 0.0,
            invariants_passed: false,
            continuity_probe_results: Vec::new(),
        }
    }

    /// passed / total over the recorded probe results; 0.0 when none ran.
    pub fn continuity_probe_pass_rate(&self) -> f64 {
        probe_pass_rate(&self.continuity_probe_results)
    }

    /// Number of claims the packet carries (mission counts as one when present).
    pub fn claim_count(&self) -> usize {
        usize::from(!self.mission_statement.is_empty())
            + self.open_threads.len()
            + self.decisions_log.len()
            + self.artifacts_refs.len()
            + self.risks.len()
    }

    /// Every event id cited anywhere in the packet, in packet order.
    pub fn cited_event_ids(&self) -> impl Iterator<Item = &EventId> {
        self.mission_evidence
            .iter()
            .chain(self.open_threads.iter().flat_map(|t| t.evidence.iter()))
            .chain(
                self.decisions_log
                    .iter()
                    .flat_map(|d| d.supporting_event_ids.iter()),
            )
            .chain(self.artifacts_refs.iter().flat_map(|a| a.evidence.iter()))
            .chain(self.risks.iter().flat_map(|r| r.evidence.iter()))
    }
}

pub fn probe_pass_rate(results: &[ProbeResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let passed = results.iter().filter(|r| r.pass).count();
    passed as f64 / results.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet() -> HandoffPacket {
        let mut p = HandoffPacket::draft("h1", "src".into(), "dst".into(), 10);
        p.mission_statement = "Ship the parser".into();
        p.mission_evidence = vec!["e1".into()];
        p.open_threads.push(OpenThread {
            thread_id: "t1".into(),
            title: "Fix lexer".into(),
            evidence: vec!["e2".into()],
        });
        p.decisions_log.push(DecisionEntry {
            decision: "Use LALR".into(),
            rationale: "Grammar is small".into(),
            supporting_event_ids: vec!["e3".into(), "e1".into()],
        });
        p
    }

    #[test]
    fn test_claims_and_citations() {
        let p = packet();
        assert_eq!(p.claim_count(), 3);
        let cited: Vec<&str> = p.cited_event_ids().map(|e| e.as_str()).collect();
        assert_eq!(cited, vec!["e1", "e2", "e3", "e1"]);
    }

    #[test]
    fn test_pass_rate() {
        let mut p = packet();
        assert_eq!(p.continuity_probe_pass_rate(), 0.0);
        for (i, cat) in ProbeCategory::ALL.iter().enumerate() {
            p.continuity_probe_results.push(ProbeResult {
                probe_category: *cat,
                pass: i != 0,
                detail: String::new(),
            });
        }
        assert!((p.continuity_probe_pass_rate() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_packet_serde_roundtrip() {
        let p = packet();
        let json = serde_json::to_string(&p).unwrap();
        let parsed: HandoffPacket = serde_json::from_str(&json).unwrap();
        assert_eq!(p, parsed);
        assert!(json.contains("\"mission_statement\":\"Ship the parser\""));
    }
}
