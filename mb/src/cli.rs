//! CLI argument parsing for the msgbus inspection tool

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "msgbus")]
#[command(author, version, about = "Inspect and poke the agent message bus", long_about = None)]
pub struct Cli {
    /// Path to the bus database
    #[arg(long, default_value = "data/bus.db")]
    pub db_path: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the most recent messages
    Peek {
        /// Number of messages to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show per-status message counts
    Status,

    /// Show the latest row for a task id
    Show {
        /// Task id to look up
        #[arg(required = true)]
        task_id: String,
    },

    /// Enqueue a message (debugging aid)
    Send {
        /// Sender role
        #[arg(long, default_value = "brain")]
        from: String,

        /// Recipient role
        #[arg(long, required = true)]
        to: String,

        /// Action string
        #[arg(long, required = true)]
        action: String,

        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
    },
}
