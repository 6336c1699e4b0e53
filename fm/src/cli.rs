//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::UnitAction;

/// fishmanager - Don't Starve Together shard manager
#[derive(Debug, Parser)]
#[command(
    name = "fm",
    about = "Manage Don't Starve Together shards running as systemd user units",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute; none opens the dashboard
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Which shards a control command applies to
#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct Target {
    /// Shard name
    pub shard: Option<String>,

    /// Every configured shard
    #[arg(short, long)]
    pub all: bool,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List shards and their status
    List,

    /// Start a shard
    Start(Target),

    /// Stop a shard
    Stop(Target),

    /// Restart a shard
    Restart(Target),

    /// Enable autostart for a shard
    Enable(Target),

    /// Disable autostart for a shard
    Disable(Target),

    /// Show logs for a shard
    Logs {
        shard: String,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,

        /// Follow log output (like tail -f)
        #[arg(short, long)]
        follow: bool,
    },

    /// Send a console command to the console shard
    Cmd {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Announce a chat message in game
    Chat {
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },

    /// Show season, day and players
    Status,

    /// Run the server updater
    Update,

    /// Enable and start configured shards, retire unlisted ones
    Sync,
}

impl Command {
    /// The unit action and target of a control subcommand
    pub fn control(&self) -> Option<(UnitAction, &Target)> {
        match self {
            Self::Start(t) => Some((UnitAction::Start, t)),
            Self::Stop(t) => Some((UnitAction::Stop, t)),
            Self::Restart(t) => Some((UnitAction::Restart, t)),
            Self::Enable(t) => Some((UnitAction::Enable, t)),
            Self::Disable(t) => Some((UnitAction::Disable, t)),
            _ => None,
        }
    }
}
