//! Per-agent session configuration

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default tool allowlist per agent
pub fn default_tools(agent: &str) -> Vec<String> {
    let tools: &[&str] = match agent {
        "builder" => &["exec", "read", "write", "edit"],
        "researcher" | "verifier" => &["web_search", "web_fetch", "read"],
        "guardian" => &["read"],
        _ => &["read"],
    };
    tools.iter().map(|t| t.to_string()).collect()
}

/// Default delegation timeout per agent
pub fn timeout_for(agent: &str) -> Duration {
    match agent {
        "builder" => Duration::from_secs(120),
        "verifier" => Duration::from_secs(90),
        "researcher" => Duration::from_secs(90),
        _ => Duration::from_secs(120),
    }
}

/// Configuration for one specialist agent's sessions
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Empty means the spawn binary's default model
    pub model: String,
    /// SOUL document path, relative to the workspace
    pub soul_path: String,
    pub tools: Vec<String>,
}

/// The optional on-disk shape of agents/<name>/config.yaml
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AgentConfigFile {
    model: Option<String>,
    #[serde(rename = "soul-path")]
    soul_path: Option<String>,
    tools: Option<Vec<String>>,
}

impl AgentConfig {
    /// Load from agents/<name>/config.yaml under the workspace, falling back
    /// to the static defaults for anything missing.
    pub fn load(name: &str, workspace: &Path) -> Self {
        let mut config = Self {
            name: name.to_string(),
            model: String::new(),
            soul_path: format!("agents/{name}/SOUL.md"),
            tools: default_tools(name),
        };

        let config_path = workspace.join("agents").join(name).join("config.yaml");
        if config_path.exists() {
            match std::fs::read_to_string(&config_path)
                .map_err(|e| e.to_string())
                .and_then(|c| serde_yaml::from_str::<AgentConfigFile>(&c).map_err(|e| e.to_string()))
            {
                Ok(file) => {
                    if let Some(model) = file.model {
                        config.model = model;
                    }
                    if let Some(soul_path) = file.soul_path {
                        config.soul_path = soul_path;
                    }
                    if let Some(tools) = file.tools {
                        config.tools = tools;
                    }
                }
                Err(e) => warn!(agent = name, error = %e, "Failed to load agent config, using defaults"),
            }
        }

        config
    }
}
