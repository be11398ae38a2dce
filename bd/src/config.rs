//! BrainDaemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main BrainDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM defaults
    pub llm: LlmConfig,

    /// Storage paths
    pub storage: StorageConfig,

    /// Worker session spawning
    pub session: SessionConfig,

    /// Guardian budget policy
    pub budget: BudgetConfig,

    /// Conversation context limits
    pub context: ContextConfig,
}

impl Config {
    /// Load configuration with fallback chain, then apply env overrides.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path)?;
        config.apply_env();
        Ok(config)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        // Explicit config path must load or fail loudly
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .braindaemon.yml
        let local_config = PathBuf::from(".braindaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/braindaemon/braindaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("braindaemon").join("braindaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Environment variables override file settings.
    fn apply_env(&mut self) {
        if let Ok(model) = std::env::var("LLM_DEFAULT_MODEL")
            && !model.is_empty()
        {
            self.llm.default_model = model;
        }
        if let Ok(budget) = std::env::var("COST_BUDGET_DAILY_TOKENS")
            && let Ok(tokens) = budget.parse()
        {
            self.budget.daily_tokens = tokens;
        }
        if let Ok(workspace) = std::env::var("WORKSPACE_DIR")
            && !workspace.is_empty()
        {
            self.session.workspace_dir = PathBuf::from(workspace);
        }
    }

    pub fn memory_db_path(&self) -> PathBuf {
        self.storage.data_dir.join("memory.db")
    }

    pub fn bus_db_path(&self) -> PathBuf {
        self.storage.data_dir.join("bus.db")
    }

    pub fn projects_db_path(&self) -> PathBuf {
        self.storage.data_dir.join("projects.db")
    }
}

/// LLM defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model used when a call doesn't name one
    #[serde(rename = "default-model")]
    pub default_model: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
        }
    }
}

/// Storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding memory.db, bus.db, and projects.db
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Worker session spawning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Workspace directory holding agent SOUL docs and build artifacts
    #[serde(rename = "workspace-dir")]
    pub workspace_dir: PathBuf,

    /// The session spawn binary
    #[serde(rename = "spawn-binary")]
    pub spawn_binary: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("workspace"),
            spawn_binary: "session-spawn".to_string(),
        }
    }
}

/// Guardian budget policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Daily token budget across all agents
    #[serde(rename = "daily-tokens")]
    pub daily_tokens: i64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_tokens: 1_000_000,
        }
    }
}

/// Conversation context limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Ceiling for estimated prompt tokens (4 chars per token)
    #[serde(rename = "max-tokens")]
    pub max_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { max_tokens: 8000 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.llm.default_model.contains("claude"));
        assert_eq!(config.budget.daily_tokens, 1_000_000);
        assert_eq!(config.session.spawn_binary, "session-spawn");
        assert_eq!(config.memory_db_path(), PathBuf::from("data/memory.db"));
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
llm:
  default-model: deepseek-chat
  max-tokens: 8192

budget:
  daily-tokens: 500000

session:
  workspace-dir: /srv/agents
  spawn-binary: my-spawner
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.llm.default_model, "deepseek-chat");
        assert_eq!(config.llm.max_tokens, 8192);
        assert_eq!(config.budget.daily_tokens, 500_000);
        assert_eq!(config.session.workspace_dir, PathBuf::from("/srv/agents"));
        assert_eq!(config.session.spawn_binary, "my-spawner");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
llm:
  default-model: qwen-plus
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.llm.default_model, "qwen-plus");
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.budget.daily_tokens, 1_000_000);
    }
}
