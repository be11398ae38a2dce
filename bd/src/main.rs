//! BrainDaemon CLI entry point

use clap::Parser;
use colored::*;
use eyre::{Context, Result};

use braindaemon::brief;
use braindaemon::cli::{Cli, Command};
use braindaemon::config::Config;
use braindaemon::daemon::Daemon;
use braindaemon::project::ProjectManager;
use memstore::MemoryStore;

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run => {
            let daemon = Daemon::build(config)?;
            daemon.run_interactive().await?;
        }
        Command::Chat { message } => {
            let mut daemon = Daemon::build(config)?;
            let response = daemon.handle_once(&message).await;
            println!("{response}");
        }
        Command::Brief => {
            let store = MemoryStore::open(config.memory_db_path()).context("Failed to open memory store")?;
            let projects =
                ProjectManager::open(config.projects_db_path()).context("Failed to open project store")?;
            println!("{}", brief::morning_brief(&store, &projects, config.budget.daily_tokens));
        }
        Command::SurfaceIdeas => {
            let store = MemoryStore::open(config.memory_db_path()).context("Failed to open memory store")?;
            let projects =
                ProjectManager::open(config.projects_db_path()).context("Failed to open project store")?;
            println!("{}", brief::surface_ideas(&store, &projects));
        }
        Command::Status => {
            let projects =
                ProjectManager::open(config.projects_db_path()).context("Failed to open project store")?;
            match projects.active_project()? {
                Some(project) => {
                    let status = projects.get_full_status(&project.id)?;
                    println!("{} - {}", status.name.cyan(), status.progress);
                    for feature in &status.features {
                        let current = feature
                            .current_task
                            .as_deref()
                            .map(|t| format!(" (next: {t})"))
                            .unwrap_or_default();
                        println!("  {} [{}] {}{}", feature.name, feature.tasks, feature.status.dimmed(), current);
                    }
                }
                None => println!("No active project"),
            }
        }
    }

    Ok(())
}
