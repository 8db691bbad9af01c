pub mod analyze;
pub mod append;
pub mod config;
pub mod events;
pub mod export;
pub mod gate;
pub mod global;
pub mod handoff;
pub mod init;
pub mod record;
pub mod sessions;
pub mod summary;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;

use baton_core::config::CONFIG_FILE;
use baton_core::model::SessionId;
use baton_core::{BatonConfig, EventLedger};

#[derive(Subcommand)]
pub enum Commands {
    /// Create a ledger directory with a default baton.toml
    Init(init::InitArgs),
    /// Append JSON envelopes (one per line) from a file or stdin
    Append(append::AppendArgs),
    /// Record a semantic event (mission, thread, decision, ...) as one actor
    Record(record::RecordArgs),
    /// List sessions, most recently active first
    Sessions(sessions::SessionsArgs),
    /// Show count, time range, actors and channels of a session
    Summary(summary::SummaryArgs),
    /// Replay a session page by page
    Events(events::EventsArgs),
    /// Analyze one session: health, anomalies, patterns, interaction graph
    Analyze(analyze::AnalyzeArgs),
    /// Aggregate analysis across recent sessions
    Global(global::GlobalArgs),
    /// Run, check or unblock context-window handoffs
    Handoff(handoff::HandoffArgs),
    /// Evaluate quality gates over recent handoffs
    Gate(gate::GateArgs),
    /// Export handoff packets with their continuity outcomes as JSONL
    Export(export::ExportArgs),
    /// Show the effective configuration
    Config(config::ConfigArgs),
}

/// Ledger directory and configuration selected by the global flags.
pub struct Workspace {
    pub dir: PathBuf,
    profile: Option<PathBuf>,
}

impl Workspace {
    pub fn new(dir: PathBuf, profile: Option<PathBuf>) -> Self {
        Self { dir, profile }
    }

    pub fn config_path(&self) -> PathBuf {
        self.profile
            .clone()
            .unwrap_or_else(|| self.dir.join(CONFIG_FILE))
    }

    pub fn is_initialized(&self) -> bool {
        self.dir.is_dir()
    }

    pub fn config(&self) -> Result<BatonConfig> {
        let path = self.config_path();
        if self.profile.is_some() && !path.exists() {
            anyhow::bail!("Profile {} does not exist", path.display());
        }
        BatonConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
    }

    /// Open the ledger with the effective configuration.
    pub fn open(&self) -> Result<(Arc<EventLedger>, BatonConfig)> {
        if !self.is_initialized() {
            anyhow::bail!(
                "No ledger at {}. Run `baton init` first.",
                self.dir.display()
            );
        }
        let config = self.config()?;
        let ledger = EventLedger::open_dir(&self.dir, config.ledger.clone())
            .with_context(|| format!("Failed to open ledger at {}", self.dir.display()))?;
        Ok((Arc::new(ledger), config))
    }
}

pub fn session_arg(raw: &str) -> Result<SessionId> {
    SessionId::parse(raw).with_context(|| format!("Invalid session id `{raw}`"))
}

pub fn display(path: &Path) -> String {
    path.display().to_string()
}
