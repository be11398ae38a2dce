//! Message types shared across the bus

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors from bus operations
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown agent role: {0}")]
    UnknownRole(String),

    #[error("Unknown message status: {0}")]
    UnknownStatus(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The named agent roles in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Brain,
    Builder,
    Verifier,
    Researcher,
    Guardian,
}

/// Static per-role permission set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub write_memory: bool,
    pub access_web: bool,
    pub execute_code: bool,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Brain => "brain",
            AgentRole::Builder => "builder",
            AgentRole::Verifier => "verifier",
            AgentRole::Researcher => "researcher",
            AgentRole::Guardian => "guardian",
        }
    }

    /// Capability flags per role. The brain is the only role allowed to
    /// write memory; only the builder executes code.
    pub fn capabilities(&self) -> Capabilities {
        match self {
            AgentRole::Brain => Capabilities {
                write_memory: true,
                access_web: false,
                execute_code: false,
            },
            AgentRole::Builder => Capabilities {
                write_memory: false,
                access_web: false,
                execute_code: true,
            },
            AgentRole::Verifier | AgentRole::Researcher => Capabilities {
                write_memory: false,
                access_web: true,
                execute_code: false,
            },
            AgentRole::Guardian => Capabilities {
                write_memory: false,
                access_web: false,
                execute_code: false,
            },
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "brain" => Ok(AgentRole::Brain),
            "builder" => Ok(AgentRole::Builder),
            "verifier" => Ok(AgentRole::Verifier),
            "researcher" => Ok(AgentRole::Researcher),
            "guardian" => Ok(AgentRole::Guardian),
            other => Err(BusError::UnknownRole(other.to_string())),
        }
    }
}

/// Lifecycle status of a bus message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    NeedsReview,
    Blocked,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::InProgress => "in_progress",
            MessageStatus::Completed => "completed",
            MessageStatus::Failed => "failed",
            MessageStatus::NeedsReview => "needs_review",
            MessageStatus::Blocked => "blocked",
        }
    }

    /// Terminal statuses are the ones the guardian scans; pending and
    /// in_progress rows are requests, not results.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Completed | MessageStatus::Failed | MessageStatus::NeedsReview | MessageStatus::Blocked
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "in_progress" => Ok(MessageStatus::InProgress),
            "completed" => Ok(MessageStatus::Completed),
            "failed" => Ok(MessageStatus::Failed),
            "needs_review" => Ok(MessageStatus::NeedsReview),
            "blocked" => Ok(MessageStatus::Blocked),
            other => Err(BusError::UnknownStatus(other.to_string())),
        }
    }
}

/// A single typed message on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    #[serde(rename = "task-id")]
    pub task_id: String,
    #[serde(rename = "from-agent")]
    pub from_agent: AgentRole,
    #[serde(rename = "to-agent")]
    pub to_agent: AgentRole,
    pub action: String,
    pub payload: serde_json::Value,
    pub context: serde_json::Value,
    pub constraints: serde_json::Value,
    pub status: MessageStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    #[serde(rename = "created-at")]
    pub created_at: String,
}

impl BusMessage {
    /// Create a new pending message with a fresh task id
    pub fn new(from_agent: AgentRole, to_agent: AgentRole, action: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::now_v7().simple().to_string(),
            from_agent,
            to_agent,
            action: action.into(),
            payload: serde_json::json!({}),
            context: serde_json::json!({}),
            constraints: serde_json::json!({}),
            status: MessageStatus::Pending,
            result: None,
            error: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Mark this message blocked with the guardian's reason
    pub fn block(&mut self, reason: impl Into<String>) {
        self.status = MessageStatus::Blocked;
        self.error = Some(reason.into());
    }
}
