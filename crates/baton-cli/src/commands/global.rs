use anyhow::{Context, Result};
use clap::Args;

use baton_query::{analyze_global, GlobalQuery};

use super::Workspace;
use crate::output::format::format_global;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct GlobalArgs {
    /// Most recently active sessions to include (default from config)
    #[arg(long)]
    pub limit_sessions: Option<usize>,

    /// Entries per ranking (default from config)
    #[arg(long)]
    pub top_n: Option<usize>,

    #[arg(long)]
    pub raw: bool,
}

pub fn run(ws: &Workspace, args: &GlobalArgs, format: OutputFormat) -> Result<()> {
    let (ledger, config) = ws.open()?;
    let mut query = GlobalQuery::from_config(&config);
    if let Some(limit) = args.limit_sessions {
        query.limit_sessions = limit;
    }
    if let Some(top_n) = args.top_n {
        query.top_n = top_n;
    }
    query.raw = args.raw;

    let global = analyze_global(&ledger, &config, &query).context("Global analysis failed")?;
    print!("{}", format_global(&global, format));
    Ok(())
}
