use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};

use baton_core::model::{ActorRole, EventId, Severity};
use baton_sdk::SessionRecorder;

use super::{session_arg, Workspace};
use crate::output::OutputFormat;

#[derive(Args)]
pub struct RecordArgs {
    /// Session to record into
    #[arg(long, short)]
    pub session: String,

    /// Recording actor
    #[arg(long, default_value = "cli")]
    pub actor: String,

    #[arg(long, value_enum, default_value = "lead")]
    pub role: Role,

    /// Parent event (defaults to none)
    #[arg(long)]
    pub after: Option<String>,

    /// Tokens consumed producing this event, as `IN:OUT`
    #[arg(long, value_parser = parse_tokens)]
    pub tokens: Option<(u64, u64)>,

    #[arg(long)]
    pub cost: Option<f64>,

    #[command(subcommand)]
    pub kind: RecordKind,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Role {
    Lead,
    Worker,
    Auditor,
    System,
    User,
}

impl From<Role> for ActorRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Lead => ActorRole::Lead,
            Role::Worker => ActorRole::Worker,
            Role::Auditor => ActorRole::Auditor,
            Role::System => ActorRole::System,
            Role::User => ActorRole::User,
        }
    }
}

#[derive(Subcommand)]
pub enum RecordKind {
    /// State the session mission
    Mission { statement: String },
    /// Open a work thread
    Thread {
        id: String,
        title: String,
    },
    /// Add a note to an open thread
    ThreadUpdate { id: String, note: String },
    /// Close a thread
    ThreadResolve { id: String },
    /// Log a decision with its rationale
    Decision {
        decision: String,
        #[arg(long, default_value = "")]
        rationale: String,
        /// Events supporting the decision
        #[arg(long = "evidence")]
        supporting: Vec<String>,
    },
    /// Register a created or updated artifact
    Artifact {
        id: String,
        /// The artifact already existed
        #[arg(long)]
        updated: bool,
    },
    /// Identify a risk
    Risk {
        id: String,
        risk: String,
        #[arg(long, value_parser = parse_severity, default_value = "medium")]
        severity: Severity,
        #[arg(long)]
        mitigation: Option<String>,
    },
    /// Record a mitigation for a known risk
    Mitigate { id: String, mitigation: String },
    /// Free-form message
    Message { text: String },
    /// Ask for a context-window handoff
    RequestHandoff {
        #[arg(default_value = "requested from cli")]
        reason: String,
    },
}

fn parse_severity(raw: &str) -> Result<Severity, String> {
    Severity::parse_loose(raw).ok_or_else(|| format!("unknown severity `{raw}`"))
}

fn parse_tokens(raw: &str) -> Result<(u64, u64), String> {
    let (input, output) = raw.split_once(':').unwrap_or((raw, "0"));
    let parse = |s: &str| s.trim().parse::<u64>().map_err(|e| format!("`{s}`: {e}"));
    Ok((parse(input)?, parse(output)?))
}

pub fn run(ws: &Workspace, args: &RecordArgs, format: OutputFormat) -> Result<()> {
    let (ledger, config) = ws.open()?;
    let session = session_arg(&args.session)?;

    let mut recorder = SessionRecorder::begin(ledger, session, &args.actor, args.role.into());
    recorder.vocabulary(config.handoff.vocabulary.clone());
    if let Some(parent) = &args.after {
        recorder.after(EventId::from(parent.as_str()));
    } else {
        recorder.unchained();
    }
    if args.tokens.is_some() || args.cost.is_some() {
        let (token_in, token_out) = args.tokens.unwrap_or((0, 0));
        recorder.usage(token_in, token_out, args.cost);
    }

    let recorded = match &args.kind {
        RecordKind::Mission { statement } => recorder.mission(statement),
        RecordKind::Thread { id, title } => recorder.open_thread(id, title),
        RecordKind::ThreadUpdate { id, note } => recorder.update_thread(id, note),
        RecordKind::ThreadResolve { id } => recorder.resolve_thread(id),
        RecordKind::Decision {
            decision,
            rationale,
            supporting,
        } => {
            let ids: Vec<EventId> = supporting.iter().map(|s| EventId::from(s.as_str())).collect();
            recorder.decision(decision, rationale, &ids)
        }
        RecordKind::Artifact { id, updated } => recorder.artifact(id, !updated),
        RecordKind::Risk {
            id,
            risk,
            severity,
            mitigation,
        } => recorder.risk(id, risk, *severity, mitigation.as_deref()),
        RecordKind::Mitigate { id, mitigation } => recorder.mitigate_risk(id, mitigation),
        RecordKind::Message { text } => recorder.message(text),
        RecordKind::RequestHandoff { reason } => recorder.request_handoff(reason),
    };
    let event_id = recorded.with_context(|| format!("Failed to record into {}", args.session))?;

    match format {
        OutputFormat::Json => print!(
            "{}",
            crate::output::format::json(&serde_json::json!({
                "session_id": recorder.session_id(),
                "event_id": event_id,
            }))
        ),
        OutputFormat::Text => println!("{event_id}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tokens() {
        assert_eq!(parse_tokens("1200:300").unwrap(), (1200, 300));
        assert_eq!(parse_tokens("50").unwrap(), (50, 0));
        assert!(parse_tokens("x:1").is_err());
    }

    #[test]
    fn test_parse_severity_accepts_loose_names() {
        assert_eq!(parse_severity("HIGH").unwrap(), Severity::High);
        assert!(parse_severity("catastrophic").is_err());
    }
}
