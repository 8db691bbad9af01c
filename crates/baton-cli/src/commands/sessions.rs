use anyhow::Result;
use clap::Args;

use super::Workspace;
use crate::output::format::format_sessions;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct SessionsArgs {
    /// Maximum number of sessions
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

pub fn run(ws: &Workspace, args: &SessionsArgs, format: OutputFormat) -> Result<()> {
    let (ledger, _) = ws.open()?;
    let rows: Vec<_> = ledger
        .list_sessions(args.limit)
        .into_iter()
        .map(|id| {
            let count = ledger.session_len(&id);
            let gate = ledger.gate(&id).label().to_string();
            (id, count, gate)
        })
        .collect();
    print!("{}", format_sessions(&rows, format));
    Ok(())
}
