//! CLI argument parsing for the braindaemon binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bd")]
#[command(author, version, about = "Multi-agent assistant orchestrator", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the daemon with a stdin transport and the guardian loops
    Run,

    /// Handle a single message and print the reply
    Chat {
        /// The user message
        #[arg(required = true)]
        message: String,
    },

    /// Print the morning brief digest
    Brief,

    /// Mine memory and projects for idea candidates
    SurfaceIdeas,

    /// Show active project status
    Status,
}
