use std::collections::BTreeSet;

use crate::anomalies::{Anomaly, AnomalyCode};
use crate::signals::PayloadSignals;

/// Operator-facing suggestions derived from the findings of one session.
pub fn recommend(
    event_count: usize,
    anomalies: &[Anomaly],
    signals: &PayloadSignals,
    type_switch_ratio: f64,
) -> Vec<String> {
    if event_count == 0 {
        return vec!["No events found. Run workloads first, then re-run analysis.".into()];
    }

    let codes: BTreeSet<AnomalyCode> = anomalies.iter().map(|a| a.code).collect();
    let mut out = Vec::new();
    let mut say = |code: AnomalyCode, text: &str| {
        if codes.contains(&code) {
            out.push(text.to_string());
        }
    };

    say(
        AnomalyCode::RepeatedFailure,
        "Stop retrying the failing step blindly; route it to a correction pass with the failure evidence attached.",
    );
    say(
        AnomalyCode::SafetyFlag,
        "Review safety-flagged events before the session continues or hands off.",
    );
    say(
        AnomalyCode::SequenceGap,
        "The ledger has undocumented sequence gaps; verify storage integrity before trusting replays.",
    );
    say(
        AnomalyCode::HighReliabilitySignalDensity,
        "Enable correction-agent automation for this session and require remediation checkpoints.",
    );
    say(
        AnomalyCode::DebateWithoutDecisions,
        "Inject decision-deadline prompts to convert debate cycles into explicit approvals or rejections.",
    );
    say(
        AnomalyCode::TemporalBurst,
        "Apply burst-aware summarization at each spike window to reduce context overload.",
    );
    say(
        AnomalyCode::OscillationLoop,
        "Trigger tie-break arbitration to break oscillation loops between repeated event transitions.",
    );
    say(
        AnomalyCode::HighP95Latency,
        "Tail latency is high; check slow tools or oversized prompts.",
    );

    if signals.context_hits > signals.decision_hits * 2 {
        out.push(
            "Context-management chatter is high relative to outcomes; prioritize action cards with completion checks."
                .into(),
        );
    }
    if type_switch_ratio < 0.25 && signals.decision_hits > 0 {
        out.push("Session is stable; snapshot this flow as a reusable playbook template.".into());
    }
    if out.is_empty() {
        out.push("No urgent anomalies detected. Keep current workflow and monitor trend deltas.".into());
    }
    out
}
