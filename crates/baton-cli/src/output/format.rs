use serde::Serialize;

use baton_core::model::SessionId;
use baton_core::storage::{ReplayPage, SessionSummary};
use baton_handoff::{GateReport, HandoffOutcome};
use baton_query::{GlobalAnalysis, SessionAnalysis};

use super::OutputFormat;

/// Pretty JSON for any serializable report, newline-terminated.
pub fn json<T: Serialize>(value: &T) -> String {
    let mut out = serde_json::to_string_pretty(value).unwrap_or_default();
    out.push('\n');
    out
}

fn ts(value: Option<chrono::DateTime<chrono::Utc>>) -> String {
    value
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_sessions(rows: &[(SessionId, usize, String)], fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => json(
            &rows
                .iter()
                .map(|(id, count, gate)| {
                    serde_json::json!({ "session_id": id, "count": count, "gate": gate })
                })
                .collect::<Vec<_>>(),
        ),
        OutputFormat::Text => {
            if rows.is_empty() {
                return "No sessions found.\n".to_string();
            }
            let mut out = String::new();
            for (id, count, gate) in rows {
                out.push_str(&format!("\u{25c6} {id}  {count} events  [{gate}]\n"));
            }
            out
        }
    }
}

pub fn format_summary(summary: &SessionSummary, gate: &str, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(summary).unwrap_or_default();
            if let Some(map) = value.as_object_mut() {
                map.insert("gate".into(), gate.into());
            }
            json(&value)
        }
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str(&format!("Session:  {}\n", summary.session_id));
            out.push_str(&format!("Gate:     {gate}\n"));
            out.push_str(&format!("Events:   {}\n", summary.count));
            out.push_str(&format!(
                "Range:    {} to {}\n",
                ts(summary.first_ts),
                ts(summary.last_ts)
            ));
            out.push_str(&format!("Actors:   {}\n", summary.actors.join(", ")));
            out.push_str(&format!("Channels: {}\n", summary.channels.join(", ")));
            out
        }
    }
}

pub fn format_replay(page: &ReplayPage, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => json(page),
        OutputFormat::Text => {
            let mut out = String::new();
            for r in &page.events {
                let e = &r.envelope;
                out.push_str(&format!(
                    "{:>5}  {}  {:<28} {} ({})\n",
                    r.sequence,
                    e.timestamp_utc.format("%Y-%m-%d %H:%M:%S"),
                    e.event_type,
                    e.actor_id,
                    e.actor_role,
                ));
            }
            out.push_str(&format!(
                "-- {} of {} events after offset {}",
                page.events.len(),
                page.total_after_since,
                page.offset
            ));
            if let Some(next) = page.next_offset {
                out.push_str(&format!(", next offset {next}"));
            }
            if !page.gap_free {
                out.push_str(" [GAPS DETECTED]");
            }
            out.push('\n');
            out
        }
    }
}

pub fn format_analysis(analysis: &SessionAnalysis, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => json(analysis),
        OutputFormat::Text => {
            let a = analysis;
            let mut out = String::new();
            out.push_str(&format!("Session: {}\n", a.session_id));
            out.push_str(&format!("Events:  {}\n", a.event_count));
            out.push_str(&format!("Health:  {:.1}/100\n", a.health_score));

            let usage = &a.resource_usage;
            out.push_str(&format!(
                "Tokens:  {} in, {} out  Cost: ${:.4}  Latency p95: {:.0}ms\n",
                usage.token_in_total, usage.token_out_total, usage.cost_total_usd, usage.latency_ms.p95
            ));

            if !a.distribution.top_event_types.is_empty() {
                out.push_str("\n--- Top Event Types ---\n");
                for entry in &a.distribution.top_event_types {
                    out.push_str(&format!("  {:<28} {}\n", entry.key, entry.count));
                }
            }
            if !a.pattern_mining.top_motifs_bigram.is_empty() {
                out.push_str("\n--- Motifs ---\n");
                for entry in &a.pattern_mining.top_motifs_bigram {
                    out.push_str(&format!("  {:<40} {}\n", entry.key, entry.count));
                }
            }

            out.push_str(&format!("\n--- Anomalies ({}) ---\n", a.anomalies.len()));
            for anomaly in &a.anomalies {
                out.push_str(&format!("  [{}] {}", anomaly.severity, anomaly.code.as_str()));
                if let Some(detail) = &anomaly.detail {
                    out.push_str(&format!(": {detail}"));
                }
                out.push('\n');
            }

            if !a.recommendations.is_empty() {
                out.push_str("\n--- Recommendations ---\n");
                for rec in &a.recommendations {
                    out.push_str(&format!("  - {rec}\n"));
                }
            }
            out
        }
    }
}

pub fn format_global(global: &GlobalAnalysis, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => json(global),
        OutputFormat::Text => {
            let g = global;
            let mut out = String::new();
            out.push_str(&format!(
                "Sessions: {}  Events: {}  Mean health: {:.1} (sd {:.1})\n",
                g.session_count, g.total_events, g.mean_health_score, g.health_stddev
            ));
            if !g.session_health.is_empty() {
                out.push_str("\n--- Session Health ---\n");
                for row in &g.session_health {
                    out.push_str(&format!(
                        "  {:<32} {:>6.1}  {} events, {} anomalies\n",
                        row.session_id.as_str(),
                        row.health_score,
                        row.event_count,
                        row.anomaly_count
                    ));
                }
            }
            if !g.recurring_event_types.is_empty() {
                out.push_str("\n--- Recurring Event Types ---\n");
                for entry in &g.recurring_event_types {
                    out.push_str(&format!("  {:<28} {} sessions\n", entry.key, entry.sessions));
                }
            }
            if !g.outlier_sessions.is_empty() {
                out.push_str("\n--- Outliers ---\n");
                for outlier in &g.outlier_sessions {
                    out.push_str(&format!(
                        "  {} ({:.1}): {}\n",
                        outlier.session_id,
                        outlier.health_score,
                        outlier.reasons.join("; ")
                    ));
                }
            }
            out
        }
    }
}

pub fn format_outcome(outcome: &HandoffOutcome, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => json(outcome),
        OutputFormat::Text => {
            let p = &outcome.packet;
            let mut out = String::new();
            out.push_str(&format!("Handoff: {}\n", outcome.handoff_id));
            out.push_str(&format!(
                "Source:  {} -> {}\n",
                p.source_session_id, p.target_session_id
            ));
            out.push_str(&format!("State:   {}\n", outcome.state()));
            out.push_str(&format!(
                "Scores:  coverage {:.2}  confidence {:.2}  probes {:.2}\n",
                p.coverage_score, p.confidence_score, outcome.continuity_probe_pass_rate
            ));
            out.push_str(&format!(
                "Attempts: {} (evidence budget {})\n",
                outcome.attempts, outcome.evidence_budget
            ));
            out.push_str(&format!("\n--- Mission ---\n  {}\n", p.mission_statement));
            if !p.open_threads.is_empty() {
                out.push_str(&format!("\n--- Open Threads ({}) ---\n", p.open_threads.len()));
                for t in &p.open_threads {
                    out.push_str(&format!("  {} {}\n", t.thread_id, t.title));
                }
            }
            if !p.decisions_log.is_empty() {
                out.push_str(&format!("\n--- Decisions ({}) ---\n", p.decisions_log.len()));
                for d in &p.decisions_log {
                    out.push_str(&format!("  {}\n", d.decision));
                }
            }
            if !p.risks.is_empty() {
                out.push_str(&format!("\n--- Risks ({}) ---\n", p.risks.len()));
                for r in &p.risks {
                    out.push_str(&format!("  [{}] {}\n", r.severity, r.risk));
                }
            }
            if !outcome.dropped.is_empty() {
                out.push_str(&format!("\nDropped {} claims during compression.\n", outcome.dropped.len()));
            }
            out
        }
    }
}

pub fn format_gate_report(report: &GateReport, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => json(report),
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str(&format!(
                "Quality gates over {} handoffs: {}\n",
                report.handoffs,
                if report.pass { "PASS" } else { "FAIL" }
            ));
            for check in &report.checks {
                let mark = if check.pass { "ok  " } else { "FAIL" };
                out.push_str(&format!(
                    "  {mark} {:<28} observed {:.3}  threshold {:.3}  {}\n",
                    check.gate, check.observed, check.threshold, check.detail
                ));
            }
            out
        }
    }
}
