//! Rule-based anomaly detection.
//!
//! Failure rules (repeated failures, safety flags, sequence gaps) look at the
//! whole window. Every other rule only sees the clean subsequence, so adding
//! an anomalous event can never remove a finding.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use baton_core::config::{AnomalyThresholds, EventClassifier};
use baton_core::model::{lifecycle, EventId, LedgerRecord, Severity};
use baton_core::storage::read::tombstone_sequences;

use crate::bursts::BurstWindow;
use crate::patterns::OscillationPair;
use crate::signals::PayloadSignals;
use crate::stats::{percentile, round_to};

/// Evidence ids kept per anomaly.
pub const MAX_EVIDENCE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyCode {
    RepeatedFailure,
    SafetyFlag,
    SequenceGap,
    LatencyOutlier,
    #[serde(rename = "HIGH_P95_LATENCY")]
    HighP95Latency,
    TemporalBurst,
    OscillationLoop,
    HighReliabilitySignalDensity,
    DebateWithoutDecisions,
}

impl AnomalyCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyCode::RepeatedFailure => "REPEATED_FAILURE",
            AnomalyCode::SafetyFlag => "SAFETY_FLAG",
            AnomalyCode::SequenceGap => "SEQUENCE_GAP",
            AnomalyCode::LatencyOutlier => "LATENCY_OUTLIER",
            AnomalyCode::HighP95Latency => "HIGH_P95_LATENCY",
            AnomalyCode::TemporalBurst => "TEMPORAL_BURST",
            AnomalyCode::OscillationLoop => "OSCILLATION_LOOP",
            AnomalyCode::HighReliabilitySignalDensity => "HIGH_RELIABILITY_SIGNAL_DENSITY",
            AnomalyCode::DebateWithoutDecisions => "DEBATE_WITHOUT_DECISIONS",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AnomalyCode::RepeatedFailure
            | AnomalyCode::SafetyFlag
            | AnomalyCode::SequenceGap
            | AnomalyCode::HighReliabilitySignalDensity => Severity::High,
            AnomalyCode::LatencyOutlier
            | AnomalyCode::HighP95Latency
            | AnomalyCode::TemporalBurst
            | AnomalyCode::OscillationLoop
            | AnomalyCode::DebateWithoutDecisions => Severity::Medium,
        }
    }
}

impl std::fmt::Display for AnomalyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub code: AnomalyCode,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<EventId>,
}

impl Anomaly {
    fn new(code: AnomalyCode, value: f64) -> Self {
        Self {
            code,
            severity: code.severity(),
            value: Some(value),
            detail: None,
            evidence: Vec::new(),
        }
    }

    fn with_detail(mut self, detail: String) -> Self {
        self.detail = Some(detail);
        self
    }

    fn with_evidence<'a>(mut self, records: impl IntoIterator<Item = &'a LedgerRecord>) -> Self {
        self.evidence = records
            .into_iter()
            .take(MAX_EVIDENCE)
            .map(|r| r.envelope.event_id.clone())
            .collect();
        self
    }
}

/// An event counts against health when its type is a failure or it carries
/// safety flags.
pub fn is_anomalous(record: &LedgerRecord, classifier: &EventClassifier) -> bool {
    classifier.is_failure(&record.envelope.event_type) || !record.envelope.safety_flags.is_empty()
}

/// Rules over the full window.
pub fn failure_anomalies(
    records: &[&LedgerRecord],
    classifier: &EventClassifier,
    thresholds: &AnomalyThresholds,
) -> Vec<Anomaly> {
    let mut found = repeated_failures(records, classifier, thresholds);

    let flagged: Vec<&LedgerRecord> = records
        .iter()
        .copied()
        .filter(|r| !r.envelope.safety_flags.is_empty())
        .collect();
    if !flagged.is_empty() {
        let mut flags: Vec<&str> = flagged
            .iter()
            .flat_map(|r| r.envelope.safety_flags.iter().map(String::as_str))
            .collect();
        flags.sort_unstable();
        flags.dedup();
        found.push(
            Anomaly::new(AnomalyCode::SafetyFlag, flagged.len() as f64)
                .with_detail(flags.join(","))
                .with_evidence(flagged),
        );
    }

    let missing = undocumented_gaps(records);
    if !missing.is_empty() {
        found.push(
            Anomaly::new(AnomalyCode::SequenceGap, missing.len() as f64).with_detail(format!(
                "missing sequences {}",
                missing
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            )),
        );
    }
    found
}

fn repeated_failures(
    records: &[&LedgerRecord],
    classifier: &EventClassifier,
    thresholds: &AnomalyThresholds,
) -> Vec<Anomaly> {
    let mut by_type: BTreeMap<&str, Vec<&LedgerRecord>> = BTreeMap::new();
    for &record in records {
        if classifier.is_failure(record.event_type()) {
            by_type.entry(record.event_type()).or_default().push(record);
        }
    }

    let mut found = Vec::new();
    for (event_type, mut failures) in by_type {
        if failures.len() < thresholds.repeated_failure_count.max(1) {
            continue;
        }
        failures.sort_by_key(|r| (r.envelope.timestamp_utc, r.sequence));
        let (start, count) = densest_window(&failures, thresholds.failure_window_seconds);
        if count >= thresholds.repeated_failure_count.max(1) {
            found.push(
                Anomaly::new(AnomalyCode::RepeatedFailure, count as f64)
                    .with_detail(event_type.to_string())
                    .with_evidence(failures[start..start + count].iter().copied()),
            );
        }
    }
    found
}

/// (start index, size) of the largest run whose timestamps fit in `window_seconds`.
fn densest_window(sorted: &[&LedgerRecord], window_seconds: i64) -> (usize, usize) {
    let stamps: Vec<DateTime<Utc>> = sorted.iter().map(|r| r.envelope.timestamp_utc).collect();
    let mut best = (0, 0);
    let mut lo = 0;
    for hi in 0..stamps.len() {
        while lo < hi && (stamps[hi] - stamps[lo]).num_seconds() > window_seconds {
            lo += 1;
        }
        if hi + 1 - lo > best.1 {
            best = (lo, hi + 1 - lo);
        }
    }
    best
}

/// Sequence numbers skipped between consecutive records of the window and
/// not covered by a tombstone inside it.
fn undocumented_gaps(records: &[&LedgerRecord]) -> Vec<u64> {
    let documented: std::collections::BTreeSet<u64> = records
        .iter()
        .filter(|r| r.event_type() == lifecycle::LEDGER_TOMBSTONE)
        .flat_map(|r| tombstone_sequences(r))
        .collect();
    records
        .windows(2)
        .flat_map(|w| (w[0].sequence + 1)..w[1].sequence.max(w[0].sequence + 1))
        .filter(|s| !documented.contains(s))
        .collect()
}

/// Inputs of the rules evaluated over the clean subsequence.
pub struct CleanStream<'a> {
    pub records: &'a [&'a LedgerRecord],
    pub signals: &'a PayloadSignals,
    pub bursts: &'a [BurstWindow],
    pub oscillations: &'a [OscillationPair],
}

pub fn stream_anomalies(stream: &CleanStream<'_>, thresholds: &AnomalyThresholds) -> Vec<Anomaly> {
    let mut found = Vec::new();
    let n = stream.records.len();
    if n == 0 {
        return found;
    }

    let latencies: Vec<f64> = stream
        .records
        .iter()
        .map(|r| r.envelope.latency_ms as f64)
        .collect();
    let baseline = percentile(&latencies, thresholds.latency_percentile);
    let bound = (baseline * thresholds.latency_outlier_multiplier).max(thresholds.latency_floor_ms as f64);
    let outliers: Vec<&LedgerRecord> = stream
        .records
        .iter()
        .copied()
        .filter(|r| r.envelope.latency_ms as f64 > bound)
        .collect();
    if !outliers.is_empty() {
        found.push(
            Anomaly::new(AnomalyCode::LatencyOutlier, outliers.len() as f64)
                .with_detail(format!("latency above {bound:.1} ms"))
                .with_evidence(outliers),
        );
    }

    let p95 = percentile(&latencies, 95.0);
    if p95 > thresholds.high_p95_latency_ms {
        found.push(Anomaly::new(AnomalyCode::HighP95Latency, round_to(p95, 3)));
    }

    if !stream.bursts.is_empty() {
        found.push(
            Anomaly::new(AnomalyCode::TemporalBurst, stream.bursts.len() as f64).with_detail(
                stream
                    .bursts
                    .iter()
                    .map(|b| b.bucket_index.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        );
    }

    if !stream.oscillations.is_empty() {
        found.push(
            Anomaly::new(AnomalyCode::OscillationLoop, stream.oscillations.len() as f64)
                .with_detail(
                    stream
                        .oscillations
                        .iter()
                        .map(|p| p.pair.as_str())
                        .collect::<Vec<_>>()
                        .join(","),
                ),
        );
    }

    let density = |hits: usize| hits as f64 / n as f64;
    let reliability = density(stream.signals.reliability_hits);
    let debate = density(stream.signals.debate_hits);
    let decision = density(stream.signals.decision_hits);
    if reliability >= thresholds.reliability_density {
        found.push(Anomaly::new(
            AnomalyCode::HighReliabilitySignalDensity,
            round_to(reliability, 6),
        ));
    }
    if debate > thresholds.debate_density && decision < thresholds.decision_density {
        found.push(Anomaly::new(
            AnomalyCode::DebateWithoutDecisions,
            round_to(debate, 6),
        ));
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::model::{ActorRole, EventEnvelope};
    use chrono::{Duration, TimeZone};

    fn rec(seq: u64, event_type: &str, secs: i64) -> LedgerRecord {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        LedgerRecord {
            sequence: seq,
            envelope: EventEnvelope::new("s".into(), "a", ActorRole::Worker, event_type)
                .at(base + Duration::seconds(secs)),
        }
    }

    #[test]
    fn test_repeated_failure_within_time_window() {
        let records = [
            rec(0, "BUILD_FAILED", 0),
            rec(1, "CODE", 10),
            rec(2, "BUILD_FAILED", 20),
            rec(3, "BUILD_FAILED", 40),
            rec(4, "TOOL_ERROR", 50),
        ];
        let refs: Vec<&LedgerRecord> = records.iter().collect();
        let found = failure_anomalies(&refs, &EventClassifier::default(), &AnomalyThresholds::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, AnomalyCode::RepeatedFailure);
        assert_eq!(found[0].detail.as_deref(), Some("BUILD_FAILED"));
        assert_eq!(found[0].evidence.len(), 3);

        // Spread beyond the window: no finding.
        let spread = [
            rec(0, "BUILD_FAILED", 0),
            rec(1, "BUILD_FAILED", 400),
            rec(2, "BUILD_FAILED", 800),
        ];
        let refs: Vec<&LedgerRecord> = spread.iter().collect();
        assert!(failure_anomalies(&refs, &EventClassifier::default(), &AnomalyThresholds::default()).is_empty());
    }

    #[test]
    fn test_safety_flags_and_gaps() {
        let mut flagged = rec(0, "TOOL_CALL", 0);
        flagged.envelope.safety_flags.insert("pii".into());
        let records = [flagged, rec(1, "CODE", 1), rec(4, "CODE", 2)];
        let refs: Vec<&LedgerRecord> = records.iter().collect();
        let found = failure_anomalies(&refs, &EventClassifier::default(), &AnomalyThresholds::default());
        let codes: Vec<AnomalyCode> = found.iter().map(|a| a.code).collect();
        assert_eq!(codes, vec![AnomalyCode::SafetyFlag, AnomalyCode::SequenceGap]);
        assert_eq!(found[1].value, Some(2.0));
        assert!(is_anomalous(&records[0], &EventClassifier::default()));
        assert!(!is_anomalous(&records[1], &EventClassifier::default()));
    }

    #[test]
    fn test_stream_rules() {
        let mut records: Vec<LedgerRecord> = (0..40).map(|i| rec(i, "STEP", i as i64)).collect();
        for r in records.iter_mut() {
            r.envelope.latency_ms = 100;
        }
        records[7].envelope.latency_ms = 5_000;
        let refs: Vec<&LedgerRecord> = records.iter().collect();
        let signals = PayloadSignals {
            reliability_hits: 10,
            debate_hits: 10,
            ..PayloadSignals::default()
        };
        let stream = CleanStream {
            records: &refs,
            signals: &signals,
            bursts: &[],
            oscillations: &[],
        };
        let found = stream_anomalies(&stream, &AnomalyThresholds::default());
        let codes: Vec<AnomalyCode> = found.iter().map(|a| a.code).collect();
        assert_eq!(
            codes,
            vec![
                AnomalyCode::LatencyOutlier,
                AnomalyCode::HighReliabilitySignalDensity,
                AnomalyCode::DebateWithoutDecisions
            ]
        );
        assert_eq!(found[0].evidence, vec![records[7].envelope.event_id.clone()]);
        assert_eq!(found[1].severity, Severity::High);
    }

    #[test]
    fn test_codes_serialize_screaming() {
        assert_eq!(
            serde_json::to_string(&AnomalyCode::HighP95Latency).unwrap(),
            "\"HIGH_P95_LATENCY\""
        );
        assert_eq!(AnomalyCode::TemporalBurst.to_string(), "TEMPORAL_BURST");
    }
}
