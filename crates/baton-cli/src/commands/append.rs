use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use serde_json::Value;

use baton_core::model::{EventEnvelope, EventId};

use super::{display, session_arg, Workspace};
use crate::output::OutputFormat;

#[derive(Args)]
pub struct AppendArgs {
    /// JSONL file of envelopes (reads stdin when omitted)
    #[arg(long, short)]
    pub file: Option<PathBuf>,

    /// Append every envelope to this session, overriding `session_id`
    #[arg(long)]
    pub session: Option<String>,
}

/// Fill the fields a writer may leave to the ledger: id, trace id and timestamp.
fn complete(mut value: Value, session: Option<&str>) -> Value {
    if let Some(map) = value.as_object_mut() {
        if let Some(session) = session {
            map.insert("session_id".into(), session.into());
        }
        map.entry("event_id")
            .or_insert_with(|| EventId::generate().as_str().into());
        let trace = map.get("session_id").cloned().unwrap_or(Value::Null);
        map.entry("trace_id").or_insert(trace);
        map.entry("timestamp_utc")
            .or_insert_with(|| Utc::now().to_rfc3339().into());
    }
    value
}

pub fn run(ws: &Workspace, args: &AppendArgs, format: OutputFormat) -> Result<()> {
    let (ledger, _) = ws.open()?;
    if let Some(session) = &args.session {
        session_arg(session)?;
    }

    let reader: Box<dyn Read> = match &args.file {
        Some(path) => Box::new(
            std::fs::File::open(path).with_context(|| format!("Failed to open {}", display(path)))?,
        ),
        None => Box::new(std::io::stdin()),
    };

    let mut appended = Vec::new();
    for (n, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .with_context(|| format!("Line {}: not valid JSON", n + 1))?;
        let envelope = EventEnvelope::from_json(complete(value, args.session.as_deref()))
            .with_context(|| format!("Line {}: invalid envelope", n + 1))?;
        let event_id = envelope.event_id.clone();
        let session_id = envelope.session_id.clone();
        let sequence = ledger
            .append(envelope)
            .with_context(|| format!("Line {}: append to {session_id} rejected", n + 1))?;
        appended.push(serde_json::json!({
            "session_id": session_id,
            "sequence": sequence,
            "event_id": event_id,
        }));
    }

    match format {
        OutputFormat::Json => print!("{}", crate::output::format::json(&appended)),
        OutputFormat::Text => {
            for row in &appended {
                println!(
                    "{} #{} {}",
                    row["session_id"].as_str().unwrap_or_default(),
                    row["sequence"],
                    row["event_id"].as_str().unwrap_or_default()
                );
            }
            println!("Appended {} events.", appended.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_fills_missing_fields() {
        let value = serde_json::json!({
            "session_id": "s1",
            "actor_id": "dev-1",
            "actor_role": "DEV",
            "event_type": "CODE",
        });
        let envelope = EventEnvelope::from_json(complete(value, None)).unwrap();
        assert_eq!(envelope.trace_id, "s1");
        assert!(envelope.event_id.as_str().starts_with("evt_"));
    }

    #[test]
    fn test_complete_session_override_keeps_explicit_trace() {
        let value = serde_json::json!({
            "session_id": "s1",
            "trace_id": "t-9",
            "event_id": "evt_fixed",
            "actor_id": "dev-1",
            "actor_role": "WORKER",
            "event_type": "CODE",
        });
        let envelope = EventEnvelope::from_json(complete(value, Some("s2"))).unwrap();
        assert_eq!(envelope.session_id.as_str(), "s2");
        assert_eq!(envelope.trace_id, "t-9");
        assert_eq!(envelope.event_id.as_str(), "evt_fixed");
    }
}
