//! SQLite-backed project state machine

use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use super::types::{Feature, FeatureStatus, FullStatus, Idea, Project, ProjectError, ProjectStatus, Task};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    spec TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'planning',
    created_at TEXT NOT NULL,
    domain TEXT
);

CREATE TABLE IF NOT EXISTS ideas (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    domain TEXT,
    created_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'backlog'
);

CREATE TABLE IF NOT EXISTS features (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    "order" INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending'
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    feature_id TEXT NOT NULL DEFAULT '',
    project_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    agent TEXT NOT NULL DEFAULT 'builder',
    depends_on TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'pending',
    result TEXT,
    "order" INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_feature ON tasks(feature_id);
CREATE INDEX IF NOT EXISTS idx_features_project ON features(project_id);
CREATE INDEX IF NOT EXISTS idx_ideas_status ON ideas(status);
"#;

/// Manages projects with a Project -> Feature -> Task hierarchy plus the
/// idea backlog. One project may be active (planning or in_progress) at a
/// time.
pub struct ProjectManager {
    conn: Mutex<Connection>,
}

impl ProjectManager {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch(SCHEMA)?;

        debug!(path = %path.display(), "Opened project store");
        Ok(Self { conn: Mutex::new(conn) })
    }

    // --- idea backlog ---

    pub fn add_idea(&self, title: &str, description: &str, domain: Option<&str>) -> Result<Idea, ProjectError> {
        let idea = Idea::new(title, description, domain.map(|d| d.to_string()));
        let conn = self.conn.lock().expect("project lock poisoned");
        conn.execute(
            "INSERT INTO ideas (id, title, description, domain, created_at, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![idea.id, idea.title, idea.description, idea.domain, idea.created_at, idea.status],
        )?;
        info!(title, "Added idea to backlog");
        Ok(idea)
    }

    pub fn list_ideas(&self, domain: Option<&str>) -> Result<Vec<Idea>, ProjectError> {
        let conn = self.conn.lock().expect("project lock poisoned");
        let mut rows = Vec::new();
        match domain {
            Some(domain) => {
                let mut stmt = conn.prepare(
                    "SELECT id, title, description, domain, created_at, status FROM ideas
                     WHERE status = 'backlog' AND domain = ?1 ORDER BY created_at DESC",
                )?;
                for idea in stmt.query_map(params![domain], row_to_idea)? {
                    rows.push(idea?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, title, description, domain, created_at, status FROM ideas
                     WHERE status = 'backlog' ORDER BY created_at DESC",
                )?;
                for idea in stmt.query_map([], row_to_idea)? {
                    rows.push(idea?);
                }
            }
        }
        Ok(rows)
    }

    /// Promote a backlog idea into a project. The spec is written later.
    pub fn promote_idea(&self, idea_id: &str) -> Result<Project, ProjectError> {
        let idea = {
            let conn = self.conn.lock().expect("project lock poisoned");
            conn.query_row(
                "SELECT id, title, description, domain, created_at, status FROM ideas WHERE id = ?1",
                params![idea_id],
                row_to_idea,
            )
            .optional()?
            .ok_or_else(|| ProjectError::NotFound(format!("idea {idea_id}")))?
        };

        let project = self.create_project_with_domain(&idea.title, &idea.description, "", idea.domain.as_deref())?;

        let conn = self.conn.lock().expect("project lock poisoned");
        conn.execute("UPDATE ideas SET status = 'promoted' WHERE id = ?1", params![idea_id])?;
        info!(title = %idea.title, project = %project.id, "Promoted idea to project");
        Ok(project)
    }

    pub fn archive_idea(&self, idea_id: &str) -> Result<(), ProjectError> {
        let conn = self.conn.lock().expect("project lock poisoned");
        let changed = conn.execute("UPDATE ideas SET status = 'archived' WHERE id = ?1", params![idea_id])?;
        if changed == 0 {
            return Err(ProjectError::NotFound(format!("idea {idea_id}")));
        }
        info!(idea_id, "Archived idea");
        Ok(())
    }

    /// Human-readable backlog listing.
    pub fn backlog_summary(&self) -> Result<String, ProjectError> {
        let ideas = self.list_ideas(None)?;
        if ideas.is_empty() {
            return Ok("Your idea backlog is empty. Share some ideas and I'll save them!".to_string());
        }

        let mut lines = vec!["**Idea Backlog:**".to_string(), String::new()];
        for (i, idea) in ideas.iter().enumerate() {
            let domain_tag = idea.domain.as_deref().map(|d| format!(" [{d}]")).unwrap_or_default();
            lines.push(format!("  {}. **{}**{}", i + 1, idea.title, domain_tag));
            if !idea.description.is_empty() {
                let mut short: String = idea.description.chars().take(100).collect();
                if idea.description.chars().count() > 100 {
                    short.push_str("...");
                }
                lines.push(format!("     {short}"));
            }
        }
        lines.push(String::new());
        lines.push(format!(
            "_{} idea(s) in backlog. Say 'promote idea N' to start building._",
            ideas.len()
        ));
        Ok(lines.join("\n"))
    }

    // --- projects ---

    pub fn create_project(&self, name: &str, description: &str, spec: &str) -> Result<Project, ProjectError> {
        self.create_project_with_domain(name, description, spec, None)
    }

    /// Refuses while another project is planning or in_progress.
    pub fn create_project_with_domain(
        &self,
        name: &str,
        description: &str,
        spec: &str,
        domain: Option<&str>,
    ) -> Result<Project, ProjectError> {
        if let Some(active) = self.active_project()? {
            return Err(ProjectError::ActiveProjectExists { name: active.name });
        }

        let mut project = Project::new(name, description, spec);
        project.domain = domain.map(|d| d.to_string());

        let conn = self.conn.lock().expect("project lock poisoned");
        conn.execute(
            "INSERT INTO projects (id, name, description, spec, status, created_at, domain)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                project.id,
                project.name,
                project.description,
                project.spec,
                project.status,
                project.created_at,
                project.domain
            ],
        )?;
        info!(name, project = %project.id, "Created project");
        Ok(project)
    }

    /// The single project in planning or in_progress, if any.
    pub fn active_project(&self) -> Result<Option<Project>, ProjectError> {
        let conn = self.conn.lock().expect("project lock poisoned");
        conn.query_row(
            "SELECT id, name, description, spec, status, created_at, domain FROM projects
             WHERE status IN ('planning', 'in_progress') ORDER BY created_at DESC LIMIT 1",
            [],
            row_to_project,
        )
        .optional()
        .map_err(ProjectError::from)
    }

    pub fn get_project(&self, project_id: &str) -> Result<Option<Project>, ProjectError> {
        let conn = self.conn.lock().expect("project lock poisoned");
        conn.query_row(
            "SELECT id, name, description, spec, status, created_at, domain FROM projects WHERE id = ?1",
            params![project_id],
            row_to_project,
        )
        .optional()
        .map_err(ProjectError::from)
    }

    pub fn update_project_status(&self, project_id: &str, status: &str) -> Result<(), ProjectError> {
        let conn = self.conn.lock().expect("project lock poisoned");
        conn.execute("UPDATE projects SET status = ?1 WHERE id = ?2", params![status, project_id])?;
        Ok(())
    }

    pub fn update_project_spec(&self, project_id: &str, spec: &str) -> Result<(), ProjectError> {
        let conn = self.conn.lock().expect("project lock poisoned");
        conn.execute("UPDATE projects SET spec = ?1 WHERE id = ?2", params![spec, project_id])?;
        Ok(())
    }

    // --- features ---

    pub fn add_features(&self, project_id: &str, features: &[Feature]) -> Result<(), ProjectError> {
        let conn = self.conn.lock().expect("project lock poisoned");
        for feature in features {
            conn.execute(
                r#"INSERT INTO features (id, project_id, title, description, "order", status)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                params![feature.id, project_id, feature.title, feature.description, feature.order, feature.status],
            )?;
        }
        info!(count = features.len(), project = project_id, "Added features");
        Ok(())
    }

    pub fn get_features(&self, project_id: &str) -> Result<Vec<Feature>, ProjectError> {
        let conn = self.conn.lock().expect("project lock poisoned");
        let mut stmt = conn.prepare(
            r#"SELECT id, project_id, title, description, "order", status FROM features
               WHERE project_id = ?1 ORDER BY "order" ASC"#,
        )?;
        let rows = stmt.query_map(params![project_id], row_to_feature)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn auto_complete_feature(&self, feature_id: &str) -> Result<(), ProjectError> {
        if feature_id.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().expect("project lock poisoned");
        let remaining: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE feature_id = ?1 AND status NOT IN ('completed', 'skipped')",
            params![feature_id],
            |row| row.get(0),
        )?;
        if remaining == 0 {
            conn.execute("UPDATE features SET status = 'completed' WHERE id = ?1", params![feature_id])?;
            info!(feature_id, "Auto-completed feature");
        }
        Ok(())
    }

    // --- tasks ---

    /// Store ordered tasks and move the project to in_progress.
    pub fn decompose_into_tasks(&self, project_id: &str, tasks: &[Task]) -> Result<(), ProjectError> {
        {
            let conn = self.conn.lock().expect("project lock poisoned");
            for task in tasks {
                conn.execute(
                    r#"INSERT INTO tasks (id, feature_id, project_id, title, description, agent, depends_on, status, result, "order")
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                    params![
                        task.id,
                        task.feature_id,
                        project_id,
                        task.title,
                        task.description,
                        task.agent,
                        serde_json::to_string(&task.depends_on)?,
                        task.status,
                        task.result,
                        task.order
                    ],
                )?;
            }
        }
        self.update_project_status(project_id, "in_progress")?;
        info!(count = tasks.len(), project = project_id, "Decomposed project into tasks");
        Ok(())
    }

    /// Lowest-order pending task whose dependencies are all terminal.
    /// Deterministic: ordering is ("order", id).
    pub fn get_next_task(&self, project_id: &str) -> Result<Option<Task>, ProjectError> {
        let pending = {
            let conn = self.conn.lock().expect("project lock poisoned");
            let mut stmt = conn.prepare(
                r#"SELECT id, feature_id, project_id, title, description, agent, depends_on, status, result, "order"
                   FROM tasks WHERE project_id = ?1 AND status = 'pending' ORDER BY "order" ASC, id ASC"#,
            )?;
            stmt.query_map(params![project_id], row_to_task)?.collect::<Result<Vec<_>, _>>()?
        };

        for task in pending {
            if self.dependencies_met(&task.depends_on)? {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    fn dependencies_met(&self, depends_on: &[String]) -> Result<bool, ProjectError> {
        if depends_on.is_empty() {
            return Ok(true);
        }
        let conn = self.conn.lock().expect("project lock poisoned");
        for dep in depends_on {
            let status: Option<String> = conn
                .query_row("SELECT status FROM tasks WHERE id = ?1", params![dep], |row| row.get(0))
                .optional()?;
            match status.as_deref() {
                Some("completed") | Some("skipped") => {}
                // Unknown ids count as unmet
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>, ProjectError> {
        let conn = self.conn.lock().expect("project lock poisoned");
        conn.query_row(
            r#"SELECT id, feature_id, project_id, title, description, agent, depends_on, status, result, "order"
               FROM tasks WHERE id = ?1"#,
            params![task_id],
            row_to_task,
        )
        .optional()
        .map_err(ProjectError::from)
    }

    pub fn get_all_tasks(&self, project_id: &str) -> Result<Vec<Task>, ProjectError> {
        let conn = self.conn.lock().expect("project lock poisoned");
        let mut stmt = conn.prepare(
            r#"SELECT id, feature_id, project_id, title, description, agent, depends_on, status, result, "order"
               FROM tasks WHERE project_id = ?1 ORDER BY "order" ASC, id ASC"#,
        )?;
        let rows = stmt.query_map(params![project_id], row_to_task)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Tasks in a given status across every project, for digests.
    pub fn tasks_by_status(&self, status: &str, limit: usize) -> Result<Vec<Task>, ProjectError> {
        let conn = self.conn.lock().expect("project lock poisoned");
        let mut stmt = conn.prepare(
            r#"SELECT id, feature_id, project_id, title, description, agent, depends_on, status, result, "order"
               FROM tasks WHERE status = ?1 ORDER BY "order" ASC, id ASC LIMIT ?2"#,
        )?;
        let rows = stmt
            .query_map(params![status, limit as i64], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_task_in_progress(&self, task_id: &str) -> Result<(), ProjectError> {
        let conn = self.conn.lock().expect("project lock poisoned");
        conn.execute("UPDATE tasks SET status = 'in_progress' WHERE id = ?1", params![task_id])?;
        // The owning feature follows
        let feature_id: Option<String> = conn
            .query_row("SELECT feature_id FROM tasks WHERE id = ?1", params![task_id], |row| row.get(0))
            .optional()?;
        if let Some(feature_id) = feature_id
            && !feature_id.is_empty()
        {
            conn.execute(
                "UPDATE features SET status = 'in_progress' WHERE id = ?1 AND status = 'pending'",
                params![feature_id],
            )?;
        }
        Ok(())
    }

    /// Complete a task with its result, auto-completing the owning feature
    /// and project when nothing non-terminal remains.
    pub fn complete_task(&self, task_id: &str, result: &str) -> Result<(), ProjectError> {
        let (project_id, feature_id) = {
            let conn = self.conn.lock().expect("project lock poisoned");
            conn.execute(
                "UPDATE tasks SET status = 'completed', result = ?1 WHERE id = ?2",
                params![result, task_id],
            )?;
            conn.query_row(
                "SELECT project_id, feature_id FROM tasks WHERE id = ?1",
                params![task_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
            .ok_or_else(|| ProjectError::NotFound(format!("task {task_id}")))?
        };

        self.auto_complete_feature(&feature_id)?;

        let remaining: i64 = {
            let conn = self.conn.lock().expect("project lock poisoned");
            conn.query_row(
                "SELECT COUNT(*) FROM tasks WHERE project_id = ?1 AND status NOT IN ('completed', 'skipped')",
                params![project_id],
                |row| row.get(0),
            )?
        };
        if remaining == 0 {
            self.update_project_status(&project_id, "completed")?;
            info!(project = %project_id, "Project completed");
        }
        Ok(())
    }

    pub fn fail_task(&self, task_id: &str, error: &str) -> Result<(), ProjectError> {
        let conn = self.conn.lock().expect("project lock poisoned");
        conn.execute(
            "UPDATE tasks SET status = 'failed', result = ?1 WHERE id = ?2",
            params![error, task_id],
        )?;
        Ok(())
    }

    // --- status ---

    /// Flat summary with blocked-task reporting.
    pub fn get_status(&self, project_id: &str) -> Result<ProjectStatus, ProjectError> {
        let project = self
            .get_project(project_id)?
            .ok_or_else(|| ProjectError::NotFound(format!("project {project_id}")))?;
        let tasks = self.get_all_tasks(project_id)?;

        let completed = tasks.iter().filter(|t| t.status == "completed").count();
        let failed: Vec<&Task> = tasks.iter().filter(|t| t.status == "failed").collect();
        let failed_ids: HashSet<&str> = failed.iter().map(|t| t.id.as_str()).collect();

        let current = match tasks.iter().find(|t| t.status == "in_progress") {
            Some(task) => Some(task.clone()),
            None => self.get_next_task(project_id)?,
        };

        let mut blockers = Vec::new();
        for task in tasks.iter().filter(|t| t.status == "pending") {
            let blocked_by: Vec<&String> = task.depends_on.iter().filter(|d| failed_ids.contains(d.as_str())).collect();
            if !blocked_by.is_empty() {
                blockers.push(format!("Task '{}' blocked by failed: {:?}", task.title, blocked_by));
            }
        }

        Ok(ProjectStatus {
            project_id: project_id.to_string(),
            project_name: project.name,
            status: project.status,
            total_tasks: tasks.len(),
            completed_tasks: completed,
            failed_tasks: failed.len(),
            current_task: current,
            blockers,
        })
    }

    /// Nested status: project -> features -> task counts.
    pub fn get_full_status(&self, project_id: &str) -> Result<FullStatus, ProjectError> {
        let project = self
            .get_project(project_id)?
            .ok_or_else(|| ProjectError::NotFound(format!("project {project_id}")))?;
        let features = self.get_features(project_id)?;
        let tasks = self.get_all_tasks(project_id)?;

        let mut feature_statuses = Vec::new();
        let mut completed_features = 0usize;

        for feature in &features {
            let feature_tasks: Vec<&Task> = tasks.iter().filter(|t| t.feature_id == feature.id).collect();
            let done = feature_tasks.iter().filter(|t| t.is_terminal()).count();

            let current_task = feature_tasks
                .iter()
                .find(|t| t.status == "in_progress")
                .or_else(|| feature_tasks.iter().find(|t| t.status == "pending"))
                .map(|t| t.title.clone())
                .filter(|_| feature.status != "completed");

            if feature.status == "completed" {
                completed_features += 1;
            }
            feature_statuses.push(FeatureStatus {
                name: feature.title.clone(),
                status: feature.status.clone(),
                tasks: format!("{done}/{}", feature_tasks.len()),
                current_task,
            });
        }

        Ok(FullStatus {
            name: project.name,
            domain: project.domain,
            progress: format!("{completed_features}/{} features done", features.len()),
            features: feature_statuses,
        })
    }
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        spec: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        domain: row.get(6)?,
    })
}

fn row_to_idea(row: &Row<'_>) -> rusqlite::Result<Idea> {
    Ok(Idea {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        domain: row.get(3)?,
        created_at: row.get(4)?,
        status: row.get(5)?,
    })
}

fn row_to_feature(row: &Row<'_>) -> rusqlite::Result<Feature> {
    Ok(Feature {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        order: row.get(4)?,
        status: row.get(5)?,
    })
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let depends_raw: String = row.get(6)?;
    Ok(Task {
        id: row.get(0)?,
        feature_id: row.get(1)?,
        project_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        agent: row.get(5)?,
        depends_on: serde_json::from_str(&depends_raw).unwrap_or_default(),
        status: row.get(7)?,
        result: row.get(8)?,
        order: row.get(9)?,
    })
}
