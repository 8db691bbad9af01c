use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use baton_handoff::{export_handoffs, ExportOptions};

use super::{display, Workspace};

#[derive(Args)]
pub struct ExportArgs {
    /// Write JSONL here instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Keep free text unredacted (requires ledger.allow_raw_reads)
    #[arg(long)]
    pub raw: bool,

    #[arg(long, default_value = "50")]
    pub limit_sessions: usize,
}

pub fn run(ws: &Workspace, args: &ExportArgs) -> Result<()> {
    let (ledger, config) = ws.open()?;
    let options = ExportOptions {
        include_raw: args.raw,
        limit_sessions: args.limit_sessions,
    };
    let records = export_handoffs(&ledger, &config, &options).context("Export failed")?;

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", display(path)))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };
    for record in &records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    if let Some(path) = &args.output {
        eprintln!("Exported {} handoffs to {}", records.len(), display(path));
    }
    Ok(())
}
