use anyhow::{Context, Result};
use clap::Args;

use baton_core::storage::{ReplayQuery, DEFAULT_PAGE_LIMIT};

use super::{session_arg, Workspace};
use crate::output::format::format_replay;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct EventsArgs {
    pub session: String,

    /// Start after this event id
    #[arg(long)]
    pub since: Option<String>,

    #[arg(short = 'n', long, default_value_t = DEFAULT_PAGE_LIMIT)]
    pub limit: usize,

    #[arg(long, default_value = "0")]
    pub offset: usize,

    /// Unredacted payloads (requires ledger.allow_raw_reads)
    #[arg(long)]
    pub raw: bool,
}

pub fn run(ws: &Workspace, args: &EventsArgs, format: OutputFormat) -> Result<()> {
    let (ledger, _) = ws.open()?;
    let session = session_arg(&args.session)?;
    let query = ReplayQuery {
        since_event_id: args.since.clone(),
        limit: args.limit,
        offset: args.offset,
        raw: args.raw,
    };
    let page = ledger
        .replay(&session, &query)
        .with_context(|| format!("Failed to replay {session}"))?;
    print!("{}", format_replay(&page, format));
    Ok(())
}
