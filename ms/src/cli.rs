//! CLI argument parsing for the memstore maintenance tool

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "memstore")]
#[command(author, version, about = "Memory store maintenance (cron tooling)", long_about = None)]
pub struct Cli {
    /// Path to the memory database
    #[arg(long, default_value = "data/memory.db")]
    pub db_path: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Cluster-merge old short-term memories into long-term rows
    Consolidate {
        /// Consolidation tier: full (merge only) or standard (merge + prune)
        #[arg(long, default_value = "full")]
        tier: String,

        /// Report counts without mutating anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Promote, decay, and flag knowledge cache facts
    Graduate,

    /// Flag old-but-active facts for passive re-verification
    Refresh,

    /// Show store counts
    Stats,
}
