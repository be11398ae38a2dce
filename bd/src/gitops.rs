//! Workspace git operations
//!
//! Auto-commits task results with a pre-commit scan for secrets, sensitive
//! filenames, and oversized files. Warnings never block a commit; the
//! guardian's bus-level scanning is the enforcement point.

use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{info, warn};

use crate::guardian::patterns;

const SENSITIVE_FILES: &[&str] = &[
    ".env",
    ".env.local",
    ".env.production",
    "credentials.json",
    "secrets.yaml",
    "secrets.yml",
];

/// Files above this size draw a warning (1MB)
const LARGE_FILE_THRESHOLD: u64 = 1_000_000;

/// A recent commit
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub message: String,
    pub author: String,
    pub date: String,
}

/// Git operations scoped to one workspace directory.
pub struct GitOps {
    workspace: PathBuf,
}

impl GitOps {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> std::io::Result<Output> {
        Command::new("git").args(args).current_dir(&self.workspace).output().await
    }

    /// Initialize a repo (idempotent) and seed a .gitignore.
    pub async fn init_repo(&self) -> bool {
        if self.workspace.join(".git").exists() {
            return true;
        }

        match self.run(&["init"]).await {
            Ok(output) if output.status.success() => {
                let gitignore = self.workspace.join(".gitignore");
                if !gitignore.exists() {
                    let _ = std::fs::write(
                        &gitignore,
                        "# Secrets and environment\n.env\n.env.*\ncredentials.json\n\n# Data\n*.db\ndata/\n\n# Build\ntarget/\n",
                    );
                }
                info!(workspace = %self.workspace.display(), "Initialized git repo");
                true
            }
            Ok(output) => {
                warn!(stderr = %String::from_utf8_lossy(&output.stderr), "git init failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "git init failed");
                false
            }
        }
    }

    /// Stage everything and commit. Returns the commit hash, or None when
    /// there was nothing to commit or git failed.
    pub async fn auto_commit(&self, message: &str) -> Option<String> {
        for warning in self.pre_commit_check().await {
            warn!(warning, "Pre-commit check");
        }

        if self.run(&["add", "-A"]).await.ok()?.status.success() {
            let status = self.run(&["status", "--porcelain"]).await.ok()?;
            if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
                info!("Nothing to commit");
                return None;
            }
        }

        let commit = self.run(&["commit", "-m", message]).await.ok()?;
        if !commit.status.success() {
            warn!(stderr = %String::from_utf8_lossy(&commit.stderr), "git commit failed");
            return None;
        }

        let hash = self.run(&["rev-parse", "HEAD"]).await.ok()?;
        let hash = String::from_utf8_lossy(&hash.stdout).trim().to_string();
        info!(hash = %hash[..8.min(hash.len())], message, "Committed");
        Some(hash)
    }

    /// Scan staged files for secrets, sensitive names, and large binaries.
    pub async fn pre_commit_check(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let staged = match self.run(&["diff", "--cached", "--name-only"]).await {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout).to_string(),
            _ => return warnings,
        };

        for filepath in staged.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let basename = Path::new(filepath).file_name().and_then(|n| n.to_str()).unwrap_or("");
            if SENSITIVE_FILES.contains(&basename) {
                warnings.push(format!("Sensitive file staged: {filepath}"));
                continue;
            }

            let full_path = self.workspace.join(filepath);
            let Ok(meta) = std::fs::metadata(&full_path) else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }

            if meta.len() > LARGE_FILE_THRESHOLD {
                warnings.push(format!("Large file ({}KB): {filepath}", meta.len() / 1024));
            }

            // Skip huge files for the content scan
            if meta.len() < 500_000
                && let Ok(content) = std::fs::read_to_string(&full_path)
                && let Some((_, description)) = patterns::find_secret(&content)
            {
                warnings.push(format!("Possible {description} in: {filepath}"));
            }
        }

        warnings
    }

    /// Branch name and dirty-file list.
    pub async fn status(&self) -> Option<(String, Vec<String>)> {
        let output = self.run(&["status", "--porcelain", "-b"]).await.ok()?;
        if !output.status.success() {
            return None;
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        let mut lines = text.lines();
        let branch = lines
            .next()
            .unwrap_or("")
            .trim_start_matches("## ")
            .split("...")
            .next()
            .unwrap_or("unknown")
            .to_string();
        let files = lines
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.get(3..).unwrap_or("").to_string())
            .collect();
        Some((branch, files))
    }

    /// Recent commit history.
    pub async fn log(&self, limit: usize) -> Vec<CommitInfo> {
        let arg = format!("-{limit}");
        let output = match self.run(&["log", &arg, "--format=%H|%h|%s|%an|%ai"]).await {
            Ok(output) if output.status.success() => output,
            _ => return Vec::new(),
        };

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.splitn(5, '|').collect();
                (parts.len() >= 5).then(|| CommitInfo {
                    hash: parts[0].to_string(),
                    short_hash: parts[1].to_string(),
                    message: parts[2].to_string(),
                    author: parts[3].to_string(),
                    date: parts[4].to_string(),
                })
            })
            .collect()
    }

    /// Revert the given commit, or HEAD when none given.
    pub async fn rollback(&self, commit_hash: Option<&str>) -> bool {
        let target = commit_hash.unwrap_or("HEAD");
        match self.run(&["revert", "--no-edit", target]).await {
            Ok(output) if output.status.success() => {
                info!(target, "Rolled back");
                true
            }
            Ok(output) => {
                warn!(stderr = %String::from_utf8_lossy(&output.stderr), "Rollback failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "Rollback failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn init_workspace() -> (TempDir, GitOps) {
        let temp = TempDir::new().unwrap();
        let git = GitOps::new(temp.path());
        assert!(git.init_repo().await);
        // Identity for commits in a bare test environment
        let _ = git.run(&["config", "user.email", "test@example.com"]).await;
        let _ = git.run(&["config", "user.name", "Test"]).await;
        (temp, git)
    }

    #[tokio::test]
    async fn test_init_and_commit() {
        let (temp, git) = init_workspace().await;

        std::fs::write(temp.path().join("main.rs"), "fn main() {}\n").unwrap();
        let hash = git.auto_commit("feat(core): add main").await;
        assert!(hash.is_some());

        let log = git.log(5).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message, "feat(core): add main");
    }

    #[tokio::test]
    async fn test_nothing_to_commit() {
        let (_temp, git) = init_workspace().await;
        assert!(git.auto_commit("feat: empty").await.is_none());
    }

    #[tokio::test]
    async fn test_pre_commit_flags_secret() {
        let (temp, git) = init_workspace().await;

        std::fs::write(
            temp.path().join("config.py"),
            "API_KEY = \"sk-abcdefghijklmnopqrstuvwxyz123456\"\n",
        )
        .unwrap();
        let _ = git.run(&["add", "-A"]).await;

        let warnings = git.pre_commit_check().await;
        assert!(warnings.iter().any(|w| w.contains("config.py")));
    }

    #[tokio::test]
    async fn test_pre_commit_flags_sensitive_filename() {
        let (temp, git) = init_workspace().await;

        std::fs::write(temp.path().join(".env"), "TOKEN=x\n").unwrap();
        let _ = git.run(&["add", "-f", ".env"]).await;

        let warnings = git.pre_commit_check().await;
        assert!(warnings.iter().any(|w| w.contains("Sensitive file")));
    }
}
