use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Durable per-workspace terminals backed by tmux.
#[derive(Debug, Parser)]
#[command(name = "chkd-term", version)]
pub struct Cli {
    /// Config file (default: <config dir>/chkd/terminal.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log session activity to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the durable session name for a workspace
    Name { workspace: PathBuf },

    /// Report whether a workspace's durable session is running
    Status { workspace: PathBuf },

    /// List durable sessions owned by chkd
    Sessions {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Kill a durable session by name
    Kill { name: String },

    /// Destroy the durable session for a workspace
    Destroy { workspace: PathBuf },

    /// Attach to (or create) a workspace terminal and relay stdin/stdout
    Open { workspace: PathBuf },
}
