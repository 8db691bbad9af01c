use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(
    name = "baton",
    version,
    about = "Append-only agent event ledger with session analytics and guarded context handoffs"
)]
struct Cli {
    /// Ledger directory
    #[arg(long, global = true, env = "BATON_DIR", default_value = ".baton")]
    dir: PathBuf,

    /// Alternate configuration file (defaults to <dir>/baton.toml)
    #[arg(long, global = true, env = "BATON_PROFILE")]
    profile: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: commands::Commands,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let ws = commands::Workspace::new(cli.dir, cli.profile);
    match &cli.command {
        commands::Commands::Init(args) => commands::init::run(&ws, args),
        commands::Commands::Append(args) => commands::append::run(&ws, args, cli.format),
        commands::Commands::Record(args) => commands::record::run(&ws, args, cli.format),
        commands::Commands::Sessions(args) => commands::sessions::run(&ws, args, cli.format),
        commands::Commands::Summary(args) => commands::summary::run(&ws, args, cli.format),
        commands::Commands::Events(args) => commands::events::run(&ws, args, cli.format),
        commands::Commands::Analyze(args) => commands::analyze::run(&ws, args, cli.format),
        commands::Commands::Global(args) => commands::global::run(&ws, args, cli.format),
        commands::Commands::Handoff(args) => commands::handoff::run(&ws, args, cli.format),
        commands::Commands::Gate(args) => commands::gate::run(&ws, args, cli.format),
        commands::Commands::Export(args) => commands::export::run(&ws, args),
        commands::Commands::Config(args) => commands::config::run(&ws, args, cli.format),
    }
}
