//! Composite health score.
//!
//! `score = 100 · (1 − Σ wᵢ·pᵢ / Σ wᵢ)` over four penalties in `[0, 1]`.
//! Churn, resource spread and role-switch abruptness are measured on the
//! clean subsequence only; the anomaly penalty is the only one that sees
//! anomalous events, which keeps the score non-increasing as they are added.

use serde::{Deserialize, Serialize};

use baton_core::config::ScoringProfile;
use baton_core::model::LedgerRecord;

use crate::anomalies::Anomaly;
use crate::stats::{percentile, round_to};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthBreakdown {
    pub score: f64,
    pub anomaly_penalty: f64,
    /// Revision events over clean events.
    pub churn_penalty: f64,
    pub resource_penalty: f64,
    pub smoothness_penalty: f64,
    pub anomalous_events: usize,
    pub clean_events: usize,
    /// Severity-weighted sum of all findings.
    pub finding_weight: f64,
    pub role_switches: usize,
    pub abrupt_role_switches: usize,
}

impl HealthBreakdown {
    /// `total` is the window size; `clean` the non-anomalous records in order.
    pub fn compute(
        total: usize,
        clean: &[&LedgerRecord],
        anomalies: &[Anomaly],
        profile: &ScoringProfile,
    ) -> Self {
        let anomalous_events = total.saturating_sub(clean.len());
        let finding_weight: f64 = anomalies
            .iter()
            .map(|a| profile.severity_weights.weight(a.severity))
            .sum();

        let anomaly_penalty = if total == 0 {
            0.0
        } else {
            ((anomalous_events as f64 + finding_weight) / total as f64).min(1.0)
        };

        let revisions = clean
            .iter()
            .filter(|r| profile.classifier.is_revision(r.event_type()))
            .count();
        let churn_ratio = if clean.is_empty() {
            0.0
        } else {
            revisions as f64 / clean.len() as f64
        };

        let cap = profile.anomalies.resource_spread_cap;
        let tokens: Vec<f64> = clean
            .iter()
            .map(|r| r.envelope.total_tokens() as f64)
            .collect();
        let latencies: Vec<f64> = clean
            .iter()
            .map(|r| r.envelope.latency_ms as f64)
            .collect();
        let resource_penalty = (spread_penalty(&tokens, cap) + spread_penalty(&latencies, cap)) / 2.0;

        let (role_switches, abrupt_role_switches) = role_switches(clean, profile);
        let smoothness_penalty = if role_switches == 0 {
            0.0
        } else {
            abrupt_role_switches as f64 / role_switches as f64
        };

        let w = &profile.weights;
        let weighted = w.anomaly_density * anomaly_penalty
            + w.churn * churn_ratio
            + w.resource_efficiency * resource_penalty
            + w.handoff_smoothness * smoothness_penalty;
        let score = if w.total() > 0.0 {
            100.0 * (1.0 - weighted / w.total())
        } else {
            100.0
        };

        Self {
            score: round_to(score.clamp(0.0, 100.0), 2),
            anomaly_penalty: round_to(anomaly_penalty, 6),
            churn_penalty: round_to(churn_ratio, 6),
            resource_penalty: round_to(resource_penalty, 6),
            smoothness_penalty: round_to(smoothness_penalty, 6),
            anomalous_events,
            clean_events: clean.len(),
            finding_weight,
            role_switches,
            abrupt_role_switches,
        }
    }
}

/// p95 against the median, scaled so that `p95/p50 == cap` saturates.
fn spread_penalty(values: &[f64], cap: f64) -> f64 {
    let p95 = percentile(values, 95.0);
    if p95 <= 0.0 {
        return 0.0;
    }
    let p50 = percentile(values, 50.0);
    if p50 <= 0.0 {
        return 1.0;
    }
    let ratio = p95 / p50;
    if cap <= 1.0 {
        return if ratio > 1.0 { 1.0 } else { 0.0 };
    }
    ((ratio - 1.0) / (cap - 1.0)).clamp(0.0, 1.0)
}

/// (switches, abrupt switches): a switch is abrupt when neither side is a
/// transition event.
fn role_switches(clean: &[&LedgerRecord], profile: &ScoringProfile) -> (usize, usize) {
    let mut switches = 0;
    let mut abrupt = 0;
    for pair in clean.windows(2) {
        if pair[0].envelope.actor_role == pair[1].envelope.actor_role {
            continue;
        }
        switches += 1;
        let classifier = &profile.classifier;
        if !classifier.is_transition(pair[0].event_type())
            && !classifier.is_transition(pair[1].event_type())
        {
            abrupt += 1;
        }
    }
    (switches, abrupt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::model::{ActorRole, EventEnvelope};

    fn rec(role: ActorRole, event_type: &str) -> LedgerRecord {
        LedgerRecord {
            sequence: 0,
            envelope: EventEnvelope::new("s".into(), "a", role, event_type)
                .with_tokens(100, 50)
                .with_latency(120),
        }
    }

    #[test]
    fn test_quiet_session_scores_full() {
        let records: Vec<_> = (0..10).map(|_| rec(ActorRole::Worker, "STEP")).collect();
        let refs: Vec<&LedgerRecord> = records.iter().collect();
        let h = HealthBreakdown::compute(refs.len(), &refs, &[], &ScoringProfile::default());
        assert_eq!(h.score, 100.0);
        assert_eq!(h.role_switches, 0);
    }

    #[test]
    fn test_abrupt_switches_cost_more_than_delegated_ones() {
        let abrupt = [
            rec(ActorRole::Lead, "PLAN"),
            rec(ActorRole::Worker, "CODE"),
        ];
        let delegated = [
            rec(ActorRole::Lead, "DELEGATE"),
            rec(ActorRole::Worker, "CODE"),
        ];
        let profile = ScoringProfile::default();
        let a: Vec<&LedgerRecord> = abrupt.iter().collect();
        let d: Vec<&LedgerRecord> = delegated.iter().collect();
        let ha = HealthBreakdown::compute(2, &a, &[], &profile);
        let hd = HealthBreakdown::compute(2, &d, &[], &profile);
        assert_eq!(ha.abrupt_role_switches, 1);
        assert_eq!(hd.abrupt_role_switches, 0);
        assert!(ha.score < hd.score);
    }

    #[test]
    fn test_churn_and_spread_penalties() {
        let mut records: Vec<_> = (0..8).map(|_| rec(ActorRole::Worker, "STEP")).collect();
        records.push(rec(ActorRole::Worker, "PATCH_RETRY"));
        records.push(rec(ActorRole::Worker, "REVISION"));
        let refs: Vec<&LedgerRecord> = records.iter().collect();
        let h = HealthBreakdown::compute(refs.len(), &refs, &[], &ScoringProfile::default());
        assert!((h.churn_penalty - 0.2).abs() < 1e-9);
        assert_eq!(h.resource_penalty, 0.0);
        assert!(h.score < 100.0);

        assert_eq!(spread_penalty(&[10.0, 10.0, 10.0], 4.0), 0.0);
        assert_eq!(spread_penalty(&[0.0, 0.0, 0.0, 100.0], 4.0), 1.0);
        assert_eq!(spread_penalty(&[], 4.0), 0.0);
    }

    #[test]
    fn test_empty_window() {
        let h = HealthBreakdown::compute(0, &[], &[], &ScoringProfile::default());
        assert_eq!(h.score, 100.0);
        assert_eq!(h.anomaly_penalty, 0.0);
    }
}
