use clap::Parser;
use colored::*;
use eyre::{Context, Result};

use memstore::cli::{Cli, Command};
use memstore::consolidation::{self, MaintenanceTier};
use memstore::graduation;
use memstore::store::MemoryStore;

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();

    if !cli.db_path.exists() {
        eprintln!("{} Memory database not found: {}", "✗".red(), cli.db_path.display());
        std::process::exit(1);
    }

    let store = MemoryStore::open(&cli.db_path).context("Failed to open memory store")?;

    match cli.command {
        Command::Consolidate { tier, dry_run } => {
            let tier: MaintenanceTier = tier.parse().map_err(|e| eyre::eyre!("{e}"))?;
            let _lock = store.maintenance_lock().context("Failed to take maintenance lock")?;
            let summary = consolidation::run_consolidation(&store, tier, dry_run)?;

            let marker = if dry_run { "(dry run)".dimmed() } else { "".normal() };
            println!("{} Consolidation complete {}", "✓".green(), marker);
            println!("  Clusters merged: {}", summary.clusters);
            println!("  Memories consolidated: {}", summary.consolidated);
            println!("  Memories pruned: {}", summary.pruned);
        }
        Command::Graduate => {
            let _lock = store.maintenance_lock().context("Failed to take maintenance lock")?;
            let summary = graduation::run_graduation(&store)?;

            println!("{} Graduation complete", "✓".green());
            println!("  Promoted: {}", summary.promoted);
            println!("  Decayed: {}", summary.decayed);
            println!("  Flagged for re-verify: {}", summary.flagged_for_reverify);
        }
        Command::Refresh => {
            let _lock = store.maintenance_lock().context("Failed to take maintenance lock")?;
            let summary = graduation::run_refresh(&store)?;

            println!("{} Knowledge refresh complete", "✓".green());
            println!("  Flagged: {}", summary.flagged);
            println!("  Already permanent: {}", summary.already_permanent);
            println!("  Skipped: {}", summary.skipped);
        }
        Command::Stats => {
            let stats = store.stats()?;
            println!("Memory store: {}", cli.db_path.display().to_string().cyan());
            println!("  Memories: {} ({} short-term, {} long-term)", stats.memories, stats.short_term, stats.long_term);
            println!("  Knowledge facts: {}", stats.facts);
            println!("  Links: {}", stats.links);
        }
    }

    Ok(())
}
