use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use clawmon_core::{Settings, StrategyChoice};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Monitor Claude Code usage quota from its terminal output")]
pub struct Config {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Data directory (default: ~/.clawmon)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Binary name or path of the claude CLI
    #[arg(long, global = true)]
    pub claude_bin: Option<String>,

    /// Acquisition strategy
    #[arg(short, long, value_enum, default_value = "auto")]
    pub strategy: StrategyArg,

    /// Polling interval in seconds (overrides the per-strategy default)
    #[arg(short = 'i', long)]
    pub interval: Option<u64>,

    /// Per-acquisition timeout in seconds
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one acquisition, print the snapshot as JSON, and exit
    Fetch,
    /// Print the last persisted snapshot without invoking the tool
    Status,
    /// Kill the persistent tmux session
    Teardown,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    /// Persistent session when tmux is available, one-shot PTY otherwise
    Auto,
    /// Single piped invocation
    Direct,
    /// Long-lived detached tmux session
    Session,
    /// Throwaway pseudo-terminal per poll
    Pty,
}

impl From<StrategyArg> for StrategyChoice {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Auto => StrategyChoice::Auto,
            StrategyArg::Direct => StrategyChoice::Direct,
            StrategyArg::Session => StrategyChoice::Session,
            StrategyArg::Pty => StrategyChoice::Pty,
        }
    }
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Build runtime settings from defaults plus CLI overrides.
    pub fn to_settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.strategy = self.strategy.into();

        if let Some(dir) = &self.data_dir {
            settings.data_dir = dir.clone();
        }
        if let Some(bin) = &self.claude_bin {
            settings.claude_bin = bin.clone();
        }
        if let Some(secs) = self.interval {
            let interval = Duration::from_secs(secs);
            settings.direct_interval = interval;
            settings.session_interval = interval;
        }
        if let Some(secs) = self.timeout {
            settings.acquire_timeout = Duration::from_secs(secs);
        }

        settings
    }
}
