use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};

use msgbus::cli::{Cli, Command};
use msgbus::{AgentRole, BusMessage, MessageBus};

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();

    if matches!(cli.command, Command::Peek { .. } | Command::Status | Command::Show { .. })
        && !cli.db_path.exists()
    {
        eprintln!("{} Bus database not found: {}", "✗".red(), cli.db_path.display());
        std::process::exit(1);
    }

    let bus = MessageBus::open(&cli.db_path).context("Failed to open bus database")?;

    match cli.command {
        Command::Peek { limit } => {
            for (id, msg) in bus.recent(limit)? {
                println!(
                    "{} {} {} -> {} [{}] {}",
                    format!("#{id}").dimmed(),
                    msg.task_id[..8.min(msg.task_id.len())].yellow(),
                    msg.from_agent,
                    msg.to_agent,
                    msg.status.as_str().cyan(),
                    msg.action,
                );
            }
        }
        Command::Status => {
            for (status, count) in bus.status_counts()? {
                println!("{:>12}  {}", status.cyan(), count);
            }
        }
        Command::Show { task_id } => match bus.get_task(&task_id)? {
            Some(msg) => println!("{}", serde_json::to_string_pretty(&msg)?),
            None => {
                eprintln!("{} No message for task {}", "✗".red(), task_id);
                std::process::exit(1);
            }
        },
        Command::Send {
            from,
            to,
            action,
            payload,
        } => {
            let from: AgentRole = from.parse().map_err(|e| eyre!("{e}"))?;
            let to: AgentRole = to.parse().map_err(|e| eyre!("{e}"))?;
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("Payload must be valid JSON")?;

            let msg = BusMessage::new(from, to, action).with_payload(payload);
            let id = bus.send(&msg)?;
            println!("{} Sent message #{} (task {})", "✓".green(), id, msg.task_id.cyan());
        }
    }

    Ok(())
}
