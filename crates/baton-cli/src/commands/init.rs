use anyhow::{Context, Result};
use clap::Args;

use baton_core::BatonConfig;

use super::{display, Workspace};

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing baton.toml with the defaults
    #[arg(long)]
    pub force: bool,
}

pub fn run(ws: &Workspace, args: &InitArgs) -> Result<()> {
    let path = ws.dir.join(baton_core::config::CONFIG_FILE);
    if path.exists() && !args.force {
        println!("Baton is already initialized in {}.", display(&ws.dir));
        println!("Use --force to reset the configuration.");
        return Ok(());
    }

    std::fs::create_dir_all(&ws.dir)
        .with_context(|| format!("Failed to create {}", display(&ws.dir)))?;
    BatonConfig::default()
        .save(&path)
        .with_context(|| format!("Failed to write {}", display(&path)))?;

    println!("Baton ledger initialized in {}.", display(&ws.dir));
    println!();
    println!("Next steps:");
    println!("  baton record mission --session <id> \"<statement>\"   Start a session");
    println!("  baton append --file events.jsonl                     Import envelopes");
    println!("  baton analyze <session>                              Check session health");
    Ok(())
}
