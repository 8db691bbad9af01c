use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use baton_handoff::{HandoffCoordinator, HandoffRequest, TriggerReason};

use super::{session_arg, Workspace};
use crate::output::format::{format_outcome, json};
use crate::output::OutputFormat;

#[derive(Args)]
pub struct HandoffArgs {
    #[command(subcommand)]
    pub action: HandoffAction,
}

#[derive(Subcommand)]
pub enum HandoffAction {
    /// Transition a source session into a fresh target session
    Run {
        #[arg(long)]
        source: String,

        #[arg(long)]
        target: String,

        /// Abort the run after this many milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Only run when a trigger condition holds
        #[arg(long)]
        if_triggered: bool,
    },
    /// Report whether a session currently meets a trigger condition
    Check { session: String },
    /// Lift the repeated-failure block of a session
    ClearBlock {
        session: String,

        #[arg(long, default_value = "cli")]
        by: String,
    },
}

pub fn run(ws: &Workspace, args: &HandoffArgs, format: OutputFormat) -> Result<()> {
    let (ledger, config) = ws.open()?;
    let coordinator = HandoffCoordinator::new(ledger, config);

    match &args.action {
        HandoffAction::Run {
            source,
            target,
            deadline_ms,
            if_triggered,
        } => {
            let source = session_arg(source)?;
            let target = session_arg(target)?;
            let trigger = match coordinator.check_trigger(&source)? {
                Some(trigger) => trigger,
                None if *if_triggered => {
                    println!("No trigger condition holds for {source}.");
                    return Ok(());
                }
                None => TriggerReason::External {
                    signal: "cli".into(),
                },
            };

            let mut request = HandoffRequest::new(source.clone(), target, trigger);
            if let Some(ms) = deadline_ms {
                request = request.with_deadline(Duration::from_millis(*ms));
            }

            let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
            let outcome = rt
                .block_on(coordinator.run(request))
                .with_context(|| format!("Handoff from {source} failed"))?;
            print!("{}", format_outcome(&outcome, format));
        }
        HandoffAction::Check { session } => {
            let session = session_arg(session)?;
            let trigger = coordinator.check_trigger(&session)?;
            match format {
                OutputFormat::Json => print!("{}", json(&trigger)),
                OutputFormat::Text => match trigger {
                    Some(TriggerReason::ContextBudget {
                        used_tokens,
                        budget_tokens,
                    }) => println!("Triggered: {used_tokens} of {budget_tokens} context tokens used."),
                    Some(TriggerReason::ExplicitRequest { event_id }) => {
                        println!("Triggered: handoff requested by {event_id}.")
                    }
                    Some(TriggerReason::External { signal }) => println!("Triggered: {signal}."),
                    None => println!("Not triggered."),
                },
            }
        }
        HandoffAction::ClearBlock { session, by } => {
            let session = session_arg(session)?;
            if coordinator.clear_block(&session, by)? {
                println!("Cleared handoff block on {session}.");
            } else {
                println!("{session} is not blocked.");
            }
        }
    }
    Ok(())
}
