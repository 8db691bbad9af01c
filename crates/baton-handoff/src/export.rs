//! Dataset export of handoff packets with their continuity outcomes.

use serde::{Deserialize, Serialize};

use baton_core::model::lifecycle::CONTEXT_HANDOFF_PACKET;
use baton_core::model::{HandoffPacket, ProbeResult, SessionId};
use baton_core::redact::redact_text;
use baton_core::{BatonConfig, CoreError, EventLedger};

use crate::error::HandoffError;
use crate::rollout::{RolloutWindow, TerminalOutcome};

#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Keep free text as written. Requires `allow_raw_reads`.
    pub include_raw: bool,
    pub limit_sessions: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_raw: false,
            limit_sessions: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub handoff_id: String,
    pub source_session_id: SessionId,
    pub target_session_id: SessionId,
    pub outcome: TerminalOutcome,
    pub reason: Option<String>,
    pub packet: HandoffPacket,
    pub continuity_probe_results: Vec<ProbeResult>,
    pub continuity_probe_pass_rate: Option<f64>,
    pub redacted: bool,
}

/// One record per packet found at sequence 0 of a recent session.
pub fn export_handoffs(
    ledger: &EventLedger,
    config: &BatonConfig,
    options: &ExportOptions,
) -> Result<Vec<ExportRecord>, HandoffError> {
    if options.include_raw && !config.ledger.allow_raw_reads {
        return Err(CoreError::RawReadsDisabled.into());
    }
    let sessions = ledger.list_sessions(options.limit_sessions);
    let mut out = Vec::new();

    for target in &sessions {
        let Some(head) = ledger.read(target, 0, 1)?.into_iter().next() else {
            continue;
        };
        if head.sequence != 0 || head.event_type() != CONTEXT_HANDOFF_PACKET {
            continue;
        }
        let Some(value) = head.envelope.payload.get("packet") else {
            tracing::warn!(session_id = %target, "Packet record without a packet");
            continue;
        };
        let mut packet: HandoffPacket = serde_json::from_value(value.clone())?;

        let source = &packet.source_session_id;
        let outcome = if ledger.session_len(source) > 0 {
            RolloutWindow::collect(ledger, std::slice::from_ref(source))?
                .handoffs
                .into_iter()
                .find(|h| h.handoff_id == packet.handoff_id)
        } else {
            None
        };
        let (outcome, reason, probes) = match outcome {
            Some(h) => (
                h.outcome,
                h.reason,
                h.summary.map(|s| s.continuity_probe_results).unwrap_or_default(),
            ),
            None => (TerminalOutcome::Pending, None, Vec::new()),
        };

        if !options.include_raw {
            redact_packet(&mut packet);
        }
        let pass_rate = (!probes.is_empty()).then(|| baton_core::model::probe_pass_rate(&probes));
        out.push(ExportRecord {
            handoff_id: packet.handoff_id.clone(),
            source_session_id: packet.source_session_id.clone(),
            target_session_id: target.clone(),
            outcome,
            reason,
            continuity_probe_results: probes,
            continuity_probe_pass_rate: pass_rate,
            packet,
            redacted: !options.include_raw,
        });
    }

    out.sort_by(|a, b| a.handoff_id.cmp(&b.handoff_id));
    tracing::info!(records = out.len(), raw = options.include_raw, "Handoff dataset exported");
    Ok(out)
}

fn redact_packet(packet: &mut HandoffPacket) {
    let scrub = |s: &mut String| *s = redact_text(s);
    scrub(&mut packet.mission_statement);
    for t in &mut packet.open_threads {
        scrub(&mut t.title);
    }
    for d in &mut packet.decisions_log {
        scrub(&mut d.decision);
        scrub(&mut d.rationale);
    }
    for r in &mut packet.risks {
        scrub(&mut r.risk);
        if let Some(m) = r.mitigation.as_mut() {
            scrub(m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::model::{ActorRole, EventEnvelope};

    fn seed_packet(ledger: &EventLedger) {
        let mut packet = HandoffPacket::draft("h1", "src".into(), "dst".into(), 1);
        packet.mission_statement = "Rotate key sk-abcdefghijklmnopqrstuvwxyz123456".into();
        ledger
            .append(EventEnvelope::new("src".into(), "dev", ActorRole::Worker, "CODE"))
            .unwrap();
        ledger.reserve(&"dst".into(), "h1").unwrap();
        let record = EventEnvelope::new("dst".into(), "c", ActorRole::System, CONTEXT_HANDOFF_PACKET)
            .with_field("handoff_id", "h1")
            .with_field("packet", serde_json::to_value(&packet).unwrap());
        ledger.bootstrap(&"dst".into(), "h1", record).unwrap();
    }

    #[test]
    fn test_export_redacts_by_default() {
        let ledger = EventLedger::in_memory();
        seed_packet(&ledger);
        let records =
            export_handoffs(&ledger, &BatonConfig::default(), &ExportOptions::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, TerminalOutcome::Pending);
        assert!(records[0].redacted);
        assert!(!records[0].packet.mission_statement.contains("sk-abcdef"));
    }

    #[test]
    fn test_raw_export_requires_opt_in() {
        let ledger = EventLedger::in_memory();
        seed_packet(&ledger);
        let raw = ExportOptions {
            include_raw: true,
            ..ExportOptions::default()
        };
        assert!(matches!(
            export_handoffs(&ledger, &BatonConfig::default(), &raw),
            Err(HandoffError::Ledger(CoreError::RawReadsDisabled))
        ));

        let mut config = BatonConfig::default();
        config.ledger.allow_raw_reads = true;
        let records = export_handoffs(&ledger, &config, &raw).unwrap();
        assert!(records[0].packet.mission_statement.contains("sk-abcdef"));
    }
}
