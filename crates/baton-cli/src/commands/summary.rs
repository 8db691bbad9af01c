use anyhow::{Context, Result};
use clap::Args;

use super::{session_arg, Workspace};
use crate::output::format::format_summary;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct SummaryArgs {
    pub session: String,
}

pub fn run(ws: &Workspace, args: &SummaryArgs, format: OutputFormat) -> Result<()> {
    let (ledger, _) = ws.open()?;
    let session = session_arg(&args.session)?;
    let summary = ledger
        .summary(&session)
        .with_context(|| format!("Failed to summarize {session}"))?;
    print!("{}", format_summary(&summary, ledger.gate(&session).label(), format));
    Ok(())
}
