use anyhow::{Context, Result};
use clap::Args;

use super::{display, Workspace};
use crate::output::OutputFormat;

#[derive(Args)]
pub struct ConfigArgs {
    /// Print only the path of the effective configuration file
    #[arg(long)]
    pub path: bool,
}

pub fn run(ws: &Workspace, args: &ConfigArgs, format: OutputFormat) -> Result<()> {
    let path = ws.config_path();
    if args.path {
        println!("{}", display(&path));
        return Ok(());
    }

    let config = ws.config()?;
    match format {
        OutputFormat::Json => print!("{}", crate::output::format::json(&config)),
        OutputFormat::Text => {
            let source = if path.exists() { display(&path) } else { "defaults".to_string() };
            println!("# source: {source}");
            println!("# fingerprint: {}", config.fingerprint());
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to render configuration")?
            );
        }
    }
    Ok(())
}
