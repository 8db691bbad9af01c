use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use baton_query::analyze_session;

use super::{display, session_arg, Workspace};
use crate::output::format::format_analysis;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct AnalyzeArgs {
    pub session: String,

    /// Analyze unredacted payloads (requires ledger.allow_raw_reads)
    #[arg(long)]
    pub raw: bool,

    /// Write the interaction graph as Graphviz DOT
    #[arg(long)]
    pub dot: Option<PathBuf>,

    /// Limit the DOT graph to this many hops around a node
    #[arg(long, requires = "dot", value_name = "NODE:DEPTH", value_parser = parse_focus)]
    pub focus: Option<(String, usize)>,
}

fn parse_focus(raw: &str) -> Result<(String, usize), String> {
    let (node, depth) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("expected NODE:DEPTH, got `{raw}`"))?;
    let depth = depth.parse().map_err(|e| format!("depth `{depth}`: {e}"))?;
    Ok((node.to_string(), depth))
}

pub fn run(ws: &Workspace, args: &AnalyzeArgs, format: OutputFormat) -> Result<()> {
    let (ledger, config) = ws.open()?;
    let session = session_arg(&args.session)?;
    let analysis = analyze_session(&ledger, &session, &config, args.raw)
        .with_context(|| format!("Failed to analyze {session}"))?;

    if let Some(path) = &args.dot {
        let graph = match &args.focus {
            Some((node, depth)) => analysis.interaction_graph.subgraph(node, *depth),
            None => analysis.interaction_graph.clone(),
        };
        std::fs::write(path, graph.to_dot())
            .with_context(|| format!("Failed to write {}", display(path)))?;
        tracing::info!(path = %super::display(path), nodes = graph.nodes.len(), "Wrote interaction graph");
    }

    print!("{}", format_analysis(&analysis, format));
    Ok(())
}
