use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use baton_core::config::{BatonConfig, ScoringProfile};
use baton_core::error::CoreError;
use baton_core::model::{LedgerRecord, SessionId};
use baton_core::redact::redact_payload;
use baton_core::storage::SessionSummary;
use baton_core::EventLedger;

use crate::anomalies::{failure_anomalies, is_anomalous, stream_anomalies, Anomaly, CleanStream};
use crate::bursts::{burst_windows, BurstWindow};
use crate::error::QueryError;
use crate::graph::{build_interaction_graph, InteractionGraph};
use crate::health::HealthBreakdown;
use crate::patterns::{motif_counts, oscillation_pairs, transition_counts, PatternMining};
use crate::recommendations::recommend;
use crate::signals::PayloadSignals;
use crate::stats::{entropy, increment, mean, percentile, round_to, top_counter, CountEntry, Counter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub first_ts: DateTime<Utc>,
    pub last_ts: DateTime<Utc>,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub p50: f64,
    pub p95: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub token_in_total: u64,
    pub token_out_total: u64,
    pub cost_total_usd: f64,
    pub latency_ms: LatencyStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub event_type_entropy: f64,
    pub actor_entropy: f64,
    pub channel_counts: BTreeMap<String, usize>,
    pub top_event_types: Vec<CountEntry>,
    pub top_actors: Vec<CountEntry>,
    /// Full event-type counts, used for cross-session aggregation.
    pub event_type_counts: Counter,
}

/// Everything derived from one session window. Never stored; always
/// recomputable from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAnalysis {
    pub session_id: SessionId,
    pub event_count: usize,
    pub window: Option<AnalysisWindow>,
    pub summary: SessionSummary,
    pub resource_usage: ResourceUsage,
    pub distribution: Distribution,
    pub interaction_graph: InteractionGraph,
    pub pattern_mining: PatternMining,
    /// Full bigram counts, used for cross-session aggregation.
    #[serde(default, skip_serializing)]
    pub bigram_counts: Counter,
    pub signals: PayloadSignals,
    pub burst_windows: Vec<BurstWindow>,
    pub anomalies: Vec<Anomaly>,
    pub health: HealthBreakdown,
    pub health_score: f64,
    pub recommendations: Vec<String>,
    pub raw: bool,
}

/// Analyze an ordered record window. Pure: the same records and profile
/// always give the same result.
pub fn analyze_records(
    session_id: &SessionId,
    records: &[LedgerRecord],
    profile: &ScoringProfile,
    top_n: usize,
) -> SessionAnalysis {
    let all: Vec<&LedgerRecord> = records.iter().collect();
    let clean: Vec<&LedgerRecord> = records
        .iter()
        .filter(|r| !is_anomalous(r, &profile.classifier))
        .collect();
    let thresholds = &profile.anomalies;

    let event_types: Vec<&str> = all.iter().map(|r| r.event_type()).collect();
    let clean_types: Vec<&str> = clean.iter().map(|r| r.event_type()).collect();

    let mut anomalies = failure_anomalies(&all, &profile.classifier, thresholds);
    let clean_signals = PayloadSignals::collect(clean.iter().copied());
    let clean_bursts = burst_windows(
        clean.iter().copied(),
        thresholds.burst_bucket_seconds,
        thresholds.burst_min_events,
    );
    let clean_oscillations =
        oscillation_pairs(&transition_counts(&clean_types), thresholds.oscillation_min_count);
    anomalies.extend(stream_anomalies(
        &CleanStream {
            records: &clean,
            signals: &clean_signals,
            bursts: &clean_bursts,
            oscillations: &clean_oscillations,
        },
        thresholds,
    ));

    let health = HealthBreakdown::compute(all.len(), &clean, &anomalies, profile);
    let signals = PayloadSignals::collect(all.iter().copied());
    let pattern_mining = PatternMining::mine(&event_types, top_n);
    let recommendations = recommend(
        all.len(),
        &anomalies,
        &signals,
        pattern_mining.type_switch_ratio,
    );

    let mut type_counts = Counter::new();
    let mut actor_counts = Counter::new();
    let mut channel_counts = BTreeMap::new();
    for r in &all {
        increment(&mut type_counts, r.event_type());
        increment(&mut actor_counts, r.envelope.actor_id.as_str());
        *channel_counts
            .entry(r.envelope.channel.as_str().to_string())
            .or_default() += 1;
    }

    let latencies: Vec<f64> = all.iter().map(|r| r.envelope.latency_ms as f64).collect();
    let resource_usage = ResourceUsage {
        token_in_total: all.iter().map(|r| r.envelope.token_in).sum(),
        token_out_total: all.iter().map(|r| r.envelope.token_out).sum(),
        cost_total_usd: round_to(all.iter().map(|r| r.envelope.cost_usd).sum(), 6),
        latency_ms: LatencyStats {
            p50: round_to(percentile(&latencies, 50.0), 3),
            p95: round_to(percentile(&latencies, 95.0), 3),
            mean: round_to(mean(&latencies), 3),
        },
    };

    let window = match (records.first(), records.last()) {
        (Some(first), Some(last)) => {
            let first_ts = records.iter().map(|r| r.envelope.timestamp_utc).min();
            let last_ts = records.iter().map(|r| r.envelope.timestamp_utc).max();
            first_ts.zip(last_ts).map(|(first_ts, last_ts)| AnalysisWindow {
                first_sequence: first.sequence,
                last_sequence: last.sequence,
                first_ts,
                last_ts,
                duration_seconds: (last_ts - first_ts).num_milliseconds() as f64 / 1000.0,
            })
        }
        _ => None,
    };

    let health_score = health.score;
    SessionAnalysis {
        session_id: session_id.clone(),
        event_count: all.len(),
        window,
        summary: SessionSummary::from_records(session_id, records),
        resource_usage,
        distribution: Distribution {
            event_type_entropy: round_to(entropy(&type_counts), 6),
            actor_entropy: round_to(entropy(&actor_counts), 6),
            channel_counts,
            top_event_types: top_counter(&type_counts, top_n),
            top_actors: top_counter(&actor_counts, top_n),
            event_type_counts: type_counts,
        },
        interaction_graph: build_interaction_graph(&all, top_n),
        pattern_mining,
        bigram_counts: motif_counts(&event_types, 2),
        signals,
        burst_windows: burst_windows(
            all.iter().copied(),
            thresholds.burst_bucket_seconds,
            thresholds.burst_min_events,
        ),
        anomalies,
        health,
        health_score,
        recommendations,
        raw: false,
    }
}

/// Read the window ending at the most recent `analysis.window_events` clean
/// records of a session and analyze it. Payloads are redacted first unless `raw`.
pub fn analyze_session(
    ledger: &EventLedger,
    session_id: &SessionId,
    config: &BatonConfig,
    raw: bool,
) -> Result<SessionAnalysis, QueryError> {
    let records = read_window(ledger, session_id, config, raw)?;
    let mut analysis = analyze_records(session_id, &records, &config.scoring, config.analysis.top_n);
    analysis.raw = raw;
    tracing::debug!(
        session_id = %session_id,
        events = analysis.event_count,
        health = analysis.health_score,
        anomalies = analysis.anomalies.len(),
        "Analyzed session"
    );
    Ok(analysis)
}

/// Start of the shortest tail holding `clean_events` non-anomalous records.
///
/// Anomalous records never push a clean one out of the window, so appending
/// one can only add to the window.
pub fn window_start(records: &[LedgerRecord], clean_events: usize, profile: &ScoringProfile) -> usize {
    let mut clean = 0usize;
    for (idx, record) in records.iter().enumerate().rev() {
        if is_anomalous(record, &profile.classifier) {
            continue;
        }
        if clean == clean_events {
            return idx + 1;
        }
        clean += 1;
    }
    0
}

pub(crate) fn read_window(
    ledger: &EventLedger,
    session_id: &SessionId,
    config: &BatonConfig,
    raw: bool,
) -> Result<Vec<LedgerRecord>, QueryError> {
    if raw && !config.ledger.allow_raw_reads {
        return Err(CoreError::RawReadsDisabled.into());
    }
    let mut records = ledger.read_all(session_id).map_err(|e| match e {
        CoreError::NotFound { id } => QueryError::SessionNotFound(id),
        other => QueryError::Core(other),
    })?;
    let start = window_start(&records, config.analysis.window_events, &config.scoring);
    records.drain(..start);
    if !raw && config.ledger.redact_payloads {
        for r in &mut records {
            r.envelope.payload = redact_payload(&r.envelope.payload);
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::model::{ActorRole, EventEnvelope};

    fn rec(seq: u64, role: ActorRole, event_type: &str) -> LedgerRecord {
        LedgerRecord {
            sequence: seq,
            envelope: EventEnvelope::new("s".into(), role.as_str().to_lowercase(), role, event_type)
                .with_tokens(200, 100)
                .with_latency(150)
                .with_cost(0.01),
        }
    }

    fn workload() -> Vec<LedgerRecord> {
        let plan = [
            (ActorRole::User, "USER_MESSAGE"),
            (ActorRole::Lead, "PLAN"),
            (ActorRole::Lead, "DELEGATE"),
            (ActorRole::Worker, "CODE"),
            (ActorRole::Worker, "TEST"),
            (ActorRole::Worker, "TASK_RETURNED"),
            (ActorRole::Auditor, "REVIEW"),
            (ActorRole::Lead, "DECISION_RECORDED"),
        ];
        plan.iter()
            .enumerate()
            .map(|(i, (role, t))| rec(i as u64, *role, t))
            .collect()
    }

    #[test]
    fn test_analysis_shape() {
        let records = workload();
        let a = analyze_records(&"s".into(), &records, &ScoringProfile::default(), 5);
        assert_eq!(a.event_count, 8);
        assert_eq!(a.resource_usage.token_in_total, 1600);
        assert!((a.resource_usage.cost_total_usd - 0.08).abs() < 1e-9);
        assert_eq!(a.resource_usage.latency_ms.p95, 150.0);
        assert_eq!(a.distribution.channel_counts["GLOBAL"], 8);
        assert_eq!(a.distribution.top_event_types.len(), 5);
        assert_eq!(a.pattern_mining.top_motifs_bigram[0].count, 1);
        assert_eq!(a.window.as_ref().unwrap().last_sequence, 7);
        assert!(a.anomalies.is_empty());
        assert!(a.health_score > 50.0 && a.health_score <= 100.0);
        assert_eq!(a.summary.count, 8);
    }

    #[test]
    fn test_health_never_increases_when_anomalies_are_injected() {
        let profile = ScoringProfile::default();
        let mut records = workload();
        let mut previous = analyze_records(&"s".into(), &records, &profile, 10).health_score;
        for i in 0..12u64 {
            let seq = records.len() as u64;
            let mut r = rec(seq, ActorRole::Worker, if i % 3 == 0 { "TOOL_ERROR" } else { "BUILD_FAILED" });
            if i % 4 == 0 {
                r.envelope.safety_flags.insert("prompt_injection".into());
            }
            r.envelope.latency_ms = 10_000 * (i + 1);
            records.push(r);
            let score = analyze_records(&"s".into(), &records, &profile, 10).health_score;
            assert!(score <= previous, "score rose from {previous} to {score}");
            previous = score;
        }
        assert!(previous < 60.0);
    }

    #[test]
    fn test_injected_anomaly_does_not_slide_window_past_clean_events() {
        let mut config = BatonConfig::default();
        config.analysis.window_events = 3;
        config.scoring.weights.anomaly_density = 0.1;
        config.scoring.weights.churn = 0.9;
        config.scoring.weights.resource_efficiency = 0.0;
        config.scoring.weights.handoff_smoothness = 0.0;
        let ledger = EventLedger::in_memory();
        let session = SessionId::from("s");
        for t in ["REVISION", "STEP", "STEP"] {
            ledger
                .append(EventEnvelope::new(session.clone(), "w", ActorRole::Worker, t))
                .unwrap();
        }
        let before = analyze_session(&ledger, &session, &config, false).unwrap();
        assert_eq!(before.event_count, 3);

        ledger
            .append(EventEnvelope::new(session.clone(), "w", ActorRole::Worker, "TOOL_ERROR"))
            .unwrap();
        let after = analyze_session(&ledger, &session, &config, false).unwrap();
        assert_eq!(after.event_count, 4);
        assert!(
            after.health_score <= before.health_score,
            "score rose from {} to {}",
            before.health_score,
            after.health_score
        );

        // A clean event does slide the window.
        ledger
            .append(EventEnvelope::new(session.clone(), "w", ActorRole::Worker, "STEP"))
            .unwrap();
        let slid = analyze_session(&ledger, &session, &config, false).unwrap();
        assert_eq!(slid.window.unwrap().first_sequence, 1);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let records = workload();
        let profile = ScoringProfile::default();
        let a = analyze_records(&"s".into(), &records, &profile, 3);
        let b = analyze_records(&"s".into(), &records, &profile, 3);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_empty_window() {
        let a = analyze_records(&"s".into(), &[], &ScoringProfile::default(), 10);
        assert_eq!(a.event_count, 0);
        assert!(a.window.is_none());
        assert!(a.recommendations[0].starts_with("No events"));
    }

    #[test]
    fn test_analyze_session_from_ledger() {
        let ledger = EventLedger::in_memory();
        for r in workload() {
            ledger.append(r.envelope).unwrap();
        }
        let config = BatonConfig::default();
        let a = analyze_session(&ledger, &"s".into(), &config, false).unwrap();
        assert_eq!(a.event_count, 8);
        assert!(matches!(
            analyze_session(&ledger, &"s".into(), &config, true),
            Err(QueryError::Core(CoreError::RawReadsDisabled))
        ));
        assert!(matches!(
            analyze_session(&ledger, &"missing".into(), &config, false),
            Err(QueryError::SessionNotFound(_))
        ));
    }
}
