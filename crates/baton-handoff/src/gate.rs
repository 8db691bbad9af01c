use serde::{Deserialize, Serialize};

use baton_core::config::GateThresholds;
use baton_core::model::probe_pass_rate;

use crate::rollout::RolloutWindow;

pub const GATE_ROLLOUT_WINDOW: &str = "rollout_window";
pub const GATE_INVARIANTS: &str = "invariants_passed";
pub const GATE_COVERAGE: &str = "coverage_score";
pub const GATE_CONFIDENCE: &str = "confidence_score";
pub const GATE_PROBES: &str = "continuity_probe_pass_rate";
pub const GATE_SILENT_FAILURES: &str = "silent_failure_rate";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateCheck {
    pub gate: String,
    pub pass: bool,
    /// Worst observed value across the window.
    pub observed: f64,
    pub threshold: f64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub pass: bool,
    pub failing_gates: Vec<String>,
    pub checks: Vec<GateCheck>,
    pub handoffs: usize,
}

/// Promotion gates over a rollout window. Reports only; nothing is
/// remediated.
#[derive(Debug, Clone, Default)]
pub struct QualityGateEvaluator {
    thresholds: GateThresholds,
}

impl QualityGateEvaluator {
    pub fn new(thresholds: GateThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &GateThresholds {
        &self.thresholds
    }

    /// `baseline_silent_failure_rate` defaults to 0.0 when no prior window
    /// exists.
    pub fn evaluate(
        &self,
        window: &RolloutWindow,
        baseline_silent_failure_rate: Option<f64>,
    ) -> GateReport {
        let t = &self.thresholds;
        let mut checks = Vec::new();

        checks.push(GateCheck {
            gate: GATE_ROLLOUT_WINDOW.into(),
            pass: !window.is_empty(),
            observed: window.len() as f64,
            threshold: 1.0,
            detail: format!("{} handoff(s) in window", window.len()),
        });

        let summaries: Vec<_> = window.handoffs.iter().filter_map(|h| h.summary.as_ref()).collect();

        let invariants: Vec<(&str, bool)> = summaries
            .iter()
            .filter_map(|s| s.invariants_passed.map(|ok| (s.handoff_id.as_str(), ok)))
            .collect();
        let broken: Vec<&str> = invariants.iter().filter(|(_, ok)| !ok).map(|(id, _)| *id).collect();
        checks.push(GateCheck {
            gate: GATE_INVARIANTS.into(),
            pass: broken.is_empty(),
            observed: if invariants.is_empty() {
                1.0
            } else {
                (invariants.len() - broken.len()) as f64 / invariants.len() as f64
            },
            threshold: 1.0,
            detail: if broken.is_empty() {
                format!("{} packet(s) validated", invariants.len())
            } else {
                format!("invariants failed for {}", broken.join(", "))
            },
        });

        checks.push(min_check(
            GATE_COVERAGE,
            summaries.iter().filter_map(|s| s.coverage_score.map(|v| (s.handoff_id.as_str(), v))),
            t.min_coverage,
        ));
        checks.push(min_check(
            GATE_CONFIDENCE,
            summaries.iter().filter_map(|s| s.confidence_score.map(|v| (s.handoff_id.as_str(), v))),
            t.min_confidence,
        ));

        // Every probe of every handoff counts, failed runs included.
        let results: Vec<_> = summaries
            .iter()
            .flat_map(|s| s.continuity_probe_results.iter().cloned())
            .collect();
        let failed: Vec<String> = summaries
            .iter()
            .flat_map(|s| {
                s.continuity_probe_results
                    .iter()
                    .filter(|r| !r.pass)
                    .map(move |r| format!("{}:{}", s.handoff_id, r.probe_category))
            })
            .collect();
        let rate = if results.is_empty() { 1.0 } else { probe_pass_rate(&results) };
        checks.push(GateCheck {
            gate: GATE_PROBES.into(),
            pass: rate >= t.required_probe_pass_rate,
            observed: rate,
            threshold: t.required_probe_pass_rate,
            detail: if failed.is_empty() {
                format!("{} probe(s) passed", results.len())
            } else {
                format!("failed probes: {}", failed.join(", "))
            },
        });

        let baseline = baseline_silent_failure_rate.unwrap_or(0.0);
        let silent = window.silent_failure_rate();
        let limit = baseline + t.silent_failure_tolerance;
        checks.push(GateCheck {
            gate: GATE_SILENT_FAILURES.into(),
            pass: silent <= limit + f64::EPSILON,
            observed: silent,
            threshold: limit,
            detail: format!("silent failure rate {silent:.3} vs baseline {baseline:.3}"),
        });

        let failing_gates: Vec<String> = checks
            .iter()
            .filter(|c| !c.pass)
            .map(|c| c.gate.clone())
            .collect();
        let pass = failing_gates.is_empty();
        if pass {
            tracing::info!(handoffs = window.len(), "Quality gates passed");
        } else {
            tracing::warn!(
                handoffs = window.len(),
                failing = %failing_gates.join(","),
                "Quality gates failed"
            );
        }
        GateReport {
            pass,
            failing_gates,
            checks,
            handoffs: window.len(),
        }
    }
}

fn min_check<'a>(
    gate: &str,
    values: impl Iterator<Item = (&'a str, f64)>,
    threshold: f64,
) -> GateCheck {
    let values: Vec<(&str, f64)> = values.collect();
    let below: Vec<&str> = values
        .iter()
        .filter(|(_, v)| *v < threshold)
        .map(|(id, _)| *id)
        .collect();
    let observed = values.iter().map(|(_, v)| *v).fold(None, |acc: Option<f64>, v| {
        Some(acc.map_or(v, |a| a.min(v)))
    });
    GateCheck {
        gate: gate.into(),
        pass: below.is_empty(),
        observed: observed.unwrap_or(1.0),
        threshold,
        detail: if below.is_empty() {
            format!("{} handoff(s) at or above {threshold:.2}", values.len())
        } else {
            format!("below {threshold:.2}: {}", below.join(", "))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::HandoffSummary;
    use crate::rollout::{HandoffRecord, TerminalOutcome};
    use crate::state::HandoffState;
    use baton_core::model::{ProbeCategory, ProbeResult};

    fn handoff(id: &str, probes_pass: &[bool]) -> HandoffRecord {
        HandoffRecord {
            handoff_id: id.into(),
            source_session_id: "src".into(),
            target_session_id: Some("dst".into()),
            started_at: None,
            outcome: TerminalOutcome::Completed,
            reason: None,
            summary: Some(HandoffSummary {
                handoff_id: id.into(),
                source_session_id: "src".into(),
                target_session_id: "dst".into(),
                state: HandoffState::Completed,
                failed_in: None,
                reason: None,
                detail: None,
                coverage_score: Some(0.9),
                confidence_score: Some(0.8),
                invariants_passed: Some(true),
                continuity_probe_results: probes_pass
                    .iter()
                    .zip(ProbeCategory::ALL)
                    .map(|(pass, category)| ProbeResult {
                        probe_category: category,
                        pass: *pass,
                        detail: String::new(),
                    })
                    .collect(),
                attempts: 1,
                evidence_budget: 250,
            }),
        }
    }

    #[test]
    fn test_all_gates_pass() {
        let window = RolloutWindow::new(vec![handoff("h1", &[true; 5]), handoff("h2", &[true; 5])]);
        let report = QualityGateEvaluator::default().evaluate(&window, None);
        assert!(report.pass, "{:?}", report.failing_gates);
        assert_eq!(report.checks.len(), 6);
    }

    #[test]
    fn test_single_failed_probe_fails_the_probe_gate_only() {
        let window = RolloutWindow::new(vec![
            handoff("h1", &[true; 5]),
            handoff("h2", &[true, true, false, true, true]),
        ]);
        let report = QualityGateEvaluator::default().evaluate(&window, None);
        assert!(!report.pass);
        assert_eq!(report.failing_gates, vec![GATE_PROBES.to_string()]);
        let probes = report.checks.iter().find(|c| c.gate == GATE_PROBES).unwrap();
        assert!(probes.detail.contains("h2:decisions"));
    }

    #[test]
    fn test_empty_window_and_silent_failures() {
        let report = QualityGateEvaluator::default().evaluate(&RolloutWindow::default(), None);
        assert_eq!(report.failing_gates, vec![GATE_ROLLOUT_WINDOW.to_string()]);

        let mut pending = handoff("h2", &[]);
        pending.outcome = TerminalOutcome::Pending;
        pending.summary = None;
        let window = RolloutWindow::new(vec![handoff("h1", &[true; 5]), pending]);
        let evaluator = QualityGateEvaluator::default();
        assert_eq!(
            evaluator.evaluate(&window, Some(0.0)).failing_gates,
            vec![GATE_SILENT_FAILURES.to_string()]
        );
        assert!(evaluator.evaluate(&window, Some(0.5)).pass);
    }

    #[test]
    fn test_low_coverage_names_the_handoff() {
        let mut low = handoff("h9", &[true; 5]);
        if let Some(s) = low.summary.as_mut() {
            s.coverage_score = Some(0.55);
        }
        let report = QualityGateEvaluator::default().evaluate(&RolloutWindow::new(vec![low]), None);
        assert_eq!(report.failing_gates, vec![GATE_COVERAGE.to_string()]);
        let check = &report.checks[2];
        assert_eq!(check.observed, 0.55);
        assert!(check.detail.contains("h9"));
    }
}
