//! Project entities

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from project operations
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Active project already exists: '{name}'. Complete or pause it first.")]
    ActiveProjectExists { name: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

/// A committed build effort
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Markdown spec, written after promotion
    pub spec: String,
    /// planning, in_progress, completed, paused
    pub status: String,
    pub created_at: String,
    pub domain: Option<String>,
}

impl Project {
    pub fn new(name: impl Into<String>, description: impl Into<String>, spec: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().simple().to_string(),
            name: name.into(),
            description: description.into(),
            spec: spec.into(),
            status: "planning".to_string(),
            created_at: Utc::now().to_rfc3339(),
            domain: None,
        }
    }
}

/// A backlog idea, not yet committed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idea {
    pub id: String,
    pub title: String,
    pub description: String,
    pub domain: Option<String>,
    pub created_at: String,
    /// backlog, promoted, archived
    pub status: String,
}

impl Idea {
    pub fn new(title: impl Into<String>, description: impl Into<String>, domain: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7().simple().to_string(),
            title: title.into(),
            description: description.into(),
            domain,
            created_at: Utc::now().to_rfc3339(),
            status: "backlog".to_string(),
        }
    }
}

/// An ordered slice of a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub order: i64,
    /// pending, in_progress, completed
    pub status: String,
}

impl Feature {
    pub fn new(project_id: impl Into<String>, title: impl Into<String>, description: impl Into<String>, order: i64) -> Self {
        Self {
            id: Uuid::now_v7().simple().to_string(),
            project_id: project_id.into(),
            title: title.into(),
            description: description.into(),
            order,
            status: "pending".to_string(),
        }
    }
}

/// One assignable unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Empty for legacy rows without a feature
    pub feature_id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    /// builder, verifier, researcher, guardian
    pub agent: String,
    pub depends_on: Vec<String>,
    /// pending, in_progress, completed, failed, skipped
    pub status: String,
    pub result: Option<String>,
    pub order: i64,
}

impl Task {
    pub fn new(project_id: impl Into<String>, title: impl Into<String>, agent: impl Into<String>, order: i64) -> Self {
        Self {
            id: Uuid::now_v7().simple().to_string(),
            feature_id: String::new(),
            project_id: project_id.into(),
            title: title.into(),
            description: String::new(),
            agent: agent.into(),
            depends_on: Vec::new(),
            status: "pending".to_string(),
            result: None,
            order,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "skipped")
    }
}

/// Flat status summary
#[derive(Debug, Clone)]
pub struct ProjectStatus {
    pub project_id: String,
    pub project_name: String,
    pub status: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub current_task: Option<Task>,
    pub blockers: Vec<String>,
}

impl ProjectStatus {
    pub fn progress_pct(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            self.completed_tasks as f64 / self.total_tasks as f64 * 100.0
        }
    }
}

/// Per-feature line in the nested status
#[derive(Debug, Clone, Serialize)]
pub struct FeatureStatus {
    pub name: String,
    pub status: String,
    /// "done/total"
    pub tasks: String,
    pub current_task: Option<String>,
}

/// Nested status: project -> features -> task counts
#[derive(Debug, Clone, Serialize)]
pub struct FullStatus {
    pub name: String,
    pub domain: Option<String>,
    /// "N/M features done"
    pub progress: String,
    pub features: Vec<FeatureStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_pct() {
        let status = ProjectStatus {
            project_id: "p".to_string(),
            project_name: "p".to_string(),
            status: "in_progress".to_string(),
            total_tasks: 4,
            completed_tasks: 1,
            failed_tasks: 0,
            current_task: None,
            blockers: Vec::new(),
        };
        assert!((status.progress_pct() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_task_terminal_states() {
        let mut task = Task::new("p", "t", "builder", 1);
        assert!(!task.is_terminal());
        task.status = "completed".to_string();
        assert!(task.is_terminal());
        task.status = "skipped".to_string();
        assert!(task.is_terminal());
        task.status = "failed".to_string();
        assert!(!task.is_terminal());
    }
}
