//! Wiring and the interactive run loop

use eyre::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use memstore::{MemoryEngine, MemoryStore};
use msgbus::MessageBus;

use crate::brain::{Brain, IncomingMessage};
use crate::config::Config;
use crate::guardian::Guardian;
use crate::llm::{LlmClient, init_usage_tracker};
use crate::session::SessionManager;

/// Everything a running daemon owns
pub struct Daemon {
    pub brain: Brain,
    pub guardian: Arc<Guardian>,
}

impl Daemon {
    /// Open the stores and wire the orchestrator and guardian together.
    pub fn build(config: Config) -> Result<Self> {
        let store = Arc::new(MemoryStore::open(config.memory_db_path()).context("Failed to open memory store")?);
        init_usage_tracker(Some(store.clone()));

        let embedder = build_embedder();
        let engine = MemoryEngine::new(store, embedder);

        let bus = Arc::new(MessageBus::open(config.bus_db_path()).context("Failed to open message bus")?);
        let projects = crate::project::ProjectManager::open(config.projects_db_path())
            .context("Failed to open project store")?;

        let llm: Arc<LlmClient> = Arc::new(LlmClient::new(&config.llm));
        let delegator = Arc::new(SessionManager::new(
            config.session.workspace_dir.clone(),
            config.session.spawn_binary.clone(),
        ));

        let guardian = Arc::new(Guardian::new(bus.clone(), llm.clone(), config.budget.daily_tokens));
        let brain = Brain::new(config, llm, delegator, engine, bus, projects);

        Ok(Self { brain, guardian })
    }

    /// Handle one message (the CLI one-shot transport).
    pub async fn handle_once(&mut self, message: &str) -> String {
        let outcome = self
            .brain
            .handle(IncomingMessage {
                message: message.to_string(),
                conversation_id: "cli".to_string(),
            })
            .await;
        outcome.response
    }

    /// Run the guardian loops plus a line-based stdin transport until EOF.
    pub async fn run_interactive(mut self) -> Result<()> {
        let guardian_task = tokio::spawn(self.guardian.clone().run());
        info!("Daemon running; guardian loops started");

        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let mut lines = stdin.lines();

        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        while let Some(line) = lines.next_line().await? {
            let message = line.trim();
            if message.is_empty() {
                stdout.write_all(b"> ").await?;
                stdout.flush().await?;
                continue;
            }
            if message == "/quit" || message == "/exit" {
                break;
            }

            let response = self.handle_once(message).await;
            stdout.write_all(format!("{response}\n\n> ").as_bytes()).await?;
            stdout.flush().await?;
        }

        guardian_task.abort();
        info!("Daemon stopped");
        Ok(())
    }
}

#[cfg(feature = "local-embeddings")]
fn build_embedder() -> Option<Arc<dyn memstore::EmbeddingProvider>> {
    match memstore::embeddings::FastembedProvider::new() {
        Ok(provider) => Some(Arc::new(provider)),
        Err(e) => {
            tracing::warn!(error = %e, "Embeddings unavailable, memory search degrades to recency");
            None
        }
    }
}

#[cfg(not(feature = "local-embeddings"))]
fn build_embedder() -> Option<Arc<dyn memstore::EmbeddingProvider>> {
    tracing::info!("Built without local-embeddings; memory search degrades to recency");
    None
}
