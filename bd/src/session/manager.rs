//! Spawning isolated worker sessions per delegation

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::config::{AgentConfig, timeout_for};

/// A task to hand to a specialist agent
#[derive(Debug, Clone)]
pub struct DelegationTask {
    pub agent: String,
    pub task: String,
    pub context: serde_json::Value,
}

impl DelegationTask {
    pub fn new(agent: impl Into<String>, task: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            agent: agent.into(),
            task: task.into(),
            context,
        }
    }
}

/// Outcome of one delegated session. Failures land here, not in an Err:
/// parallel delegation is fail-partial and the caller inspects `success`.
#[derive(Debug, Clone)]
pub struct DelegationResult {
    pub agent: String,
    pub success: bool,
    pub result: String,
    pub session_key: String,
    pub error: Option<String>,
}

impl DelegationResult {
    fn failure(agent: &str, session_key: &str, error: impl Into<String>) -> Self {
        Self {
            agent: agent.to_string(),
            success: false,
            result: String::new(),
            session_key: session_key.to_string(),
            error: Some(error.into()),
        }
    }
}

/// Seam for delegation so the orchestrator is testable without spawning
/// real sessions.
#[async_trait]
pub trait Delegator: Send + Sync {
    async fn delegate(
        &self,
        agent: &str,
        task: &str,
        context: serde_json::Value,
        timeout: Option<Duration>,
    ) -> DelegationResult;

    /// Dispatch all tasks concurrently; one result per task, failures
    /// independent.
    async fn delegate_parallel(&self, tasks: Vec<DelegationTask>, default_timeout: Duration)
    -> Vec<DelegationResult>;
}

/// Spawns one isolated child session per delegation via the external
/// `session-spawn` binary.
pub struct SessionManager {
    workspace: PathBuf,
    spawn_binary: String,
    configs: Mutex<HashMap<String, AgentConfig>>,
}

impl SessionManager {
    pub fn new(workspace: impl Into<PathBuf>, spawn_binary: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            spawn_binary: spawn_binary.into(),
            configs: Mutex::new(HashMap::new()),
        }
    }

    fn config_for(&self, agent: &str) -> AgentConfig {
        let mut configs = self.configs.lock().expect("config lock poisoned");
        configs
            .entry(agent.to_string())
            .or_insert_with(|| AgentConfig::load(agent, &self.workspace))
            .clone()
    }

    /// System prompt: SOUL document, shared TEAM document, and the scoped
    /// context as a fenced JSON block.
    fn build_system_prompt(&self, config: &AgentConfig, context: &serde_json::Value) -> String {
        let mut parts: Vec<String> = Vec::new();

        let soul_path = self.workspace.join(&config.soul_path);
        match std::fs::read_to_string(&soul_path) {
            Ok(soul) => parts.push(soul.trim().to_string()),
            Err(_) => parts.push(format!(
                "You are the {} agent. Complete the assigned task.",
                config.name
            )),
        }

        let team_path = self.workspace.join("TEAM.md");
        if let Ok(team) = std::fs::read_to_string(&team_path) {
            parts.push(format!("## Team Context\n{}", team.trim()));
        }

        if !context.is_null() {
            let rendered = serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".to_string());
            parts.push(format!("## Task Context\n```json\n{rendered}\n```"));
        }

        parts.join("\n\n")
    }

    async fn run_session(
        &self,
        config: &AgentConfig,
        session_key: &str,
        system_prompt: &str,
        task: &str,
        timeout: Duration,
    ) -> DelegationResult {
        // The prompt goes through a file to avoid argv length and escaping
        // limits. NamedTempFile unlinks on drop, covering every exit path.
        let mut system_file = match NamedTempFile::new() {
            Ok(f) => f,
            Err(e) => return DelegationResult::failure(&config.name, session_key, format!("tempfile: {e}")),
        };
        if let Err(e) = system_file.write_all(system_prompt.as_bytes()) {
            return DelegationResult::failure(&config.name, session_key, format!("tempfile write: {e}"));
        }

        let mut command = Command::new(&self.spawn_binary);
        command
            .arg("sessions")
            .arg("spawn")
            .arg("--label")
            .arg(session_key);
        if !config.model.is_empty() {
            command.arg("--model").arg(&config.model);
        }
        command.arg("--system-file").arg(system_file.path());
        for tool in &config.tools {
            command.arg("--tool").arg(tool);
        }
        command
            .arg("--message")
            .arg(task)
            .current_dir(&self.workspace)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out child must not linger
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                return DelegationResult::failure(&config.name, session_key, format!("spawn failed: {e}"));
            }
        };

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return DelegationResult::failure(&config.name, session_key, format!("wait failed: {e}"));
            }
            Err(_) => {
                // Dropping the in-flight future kills and reaps the child
                error!(session = session_key, ?timeout, "Session timed out");
                return DelegationResult::failure(&config.name, session_key, format!("Timeout after {timeout:?}"));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                format!("exit code {:?}", output.status.code())
            } else {
                stderr
            };
            return DelegationResult::failure(&config.name, session_key, reason);
        }

        DelegationResult {
            agent: config.name.clone(),
            success: true,
            result: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            session_key: session_key.to_string(),
            error: None,
        }
    }
}

#[async_trait]
impl Delegator for SessionManager {
    async fn delegate(
        &self,
        agent: &str,
        task: &str,
        context: serde_json::Value,
        timeout: Option<Duration>,
    ) -> DelegationResult {
        let config = self.config_for(agent);
        let session_key = format!("{agent}_{}", &Uuid::now_v7().simple().to_string()[..8]);
        let timeout = timeout.unwrap_or_else(|| timeout_for(agent));
        let system_prompt = self.build_system_prompt(&config, &context);

        info!(agent, session = %session_key, model = %config.model, "Delegating to worker session");
        let result = self.run_session(&config, &session_key, &system_prompt, task, timeout).await;
        debug!(agent, session = %session_key, success = result.success, "Delegation finished");
        result
    }

    async fn delegate_parallel(
        &self,
        tasks: Vec<DelegationTask>,
        default_timeout: Duration,
    ) -> Vec<DelegationResult> {
        let futures = tasks.iter().map(|t| {
            let timeout = if t.agent == "builder" || t.agent == "verifier" || t.agent == "researcher" {
                timeout_for(&t.agent)
            } else {
                default_timeout
            };
            self.delegate(&t.agent, &t.task, t.context.clone(), Some(timeout))
        });
        join_all(futures).await
    }
}
