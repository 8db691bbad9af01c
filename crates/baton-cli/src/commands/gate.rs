use anyhow::{Context, Result};
use clap::Args;

use baton_handoff::{QualityGateEvaluator, RolloutWindow};

use super::Workspace;
use crate::output::format::format_gate_report;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct GateArgs {
    /// Sessions in the rollout window; the next as many older ones form the baseline
    #[arg(long)]
    pub limit_sessions: Option<usize>,
}

pub fn run(ws: &Workspace, args: &GateArgs, format: OutputFormat) -> Result<()> {
    let (ledger, config) = ws.open()?;
    let limit = args.limit_sessions.unwrap_or(config.global.limit_sessions);
    let (window, baseline) =
        RolloutWindow::recent_with_baseline(&ledger, limit).context("Failed to read handoffs")?;
    let baseline_rate = (!baseline.is_empty()).then(|| baseline.silent_failure_rate());

    let report = QualityGateEvaluator::new(config.gates.clone()).evaluate(&window, baseline_rate);
    print!("{}", format_gate_report(&report, format));
    if !report.pass {
        anyhow::bail!("Quality gates failed: {}", report.failing_gates.join(", "));
    }
    Ok(())
}
