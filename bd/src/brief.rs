//! Daily brief and weekly idea surfacing
//!
//! Both are compiled from the stores on demand; external cron invokes them
//! through the CLI (`bd brief`, `bd surface-ideas`).

use chrono::{Duration, Utc};

use memstore::MemoryStore;

use crate::project::ProjectManager;

/// Keywords suggesting a memory is an unacted-on intention
const THREAD_KEYWORDS: &[&str] = &["should", "could", "want to", "need to", "idea", "improve"];

/// Compile the morning digest: progress, queue, memory stats, budget.
pub fn morning_brief(store: &MemoryStore, projects: &ProjectManager, daily_token_budget: i64) -> String {
    let day_ago = (Utc::now() - Duration::hours(24)).to_rfc3339();
    let mut sections = vec!["## Morning Brief".to_string()];

    // Project progress
    match projects.active_project() {
        Ok(Some(project)) => {
            let line = projects
                .get_full_status(&project.id)
                .map(|s| format!("**{}** - {}", s.name, s.progress))
                .unwrap_or_else(|_| format!("**{}**", project.name));
            sections.push(format!("### Active project\n{line}"));
        }
        _ => sections.push("### Active project\nNone".to_string()),
    }

    // Completed and queued work
    let completed = projects.tasks_by_status("completed", 5).unwrap_or_default();
    let queued = projects.tasks_by_status("pending", 5).unwrap_or_default();
    let failed = projects.tasks_by_status("failed", 5).unwrap_or_default();

    let mut work = Vec::new();
    work.push(format!("Completed: {}", completed.len()));
    for task in &completed {
        work.push(format!("  - {}", task.title));
    }
    work.push(format!("Queued: {}", queued.len()));
    for task in &queued {
        work.push(format!("  - {}", task.title));
    }
    if !failed.is_empty() {
        work.push(format!("Failed: {}", failed.len()));
        for task in &failed {
            work.push(format!("  - {}", task.title));
        }
    }
    sections.push(format!("### Tasks\n{}", work.join("\n")));

    // Memory stats
    if let Ok(stats) = store.stats() {
        let new_memories = store.count_memories_since(&day_ago).unwrap_or(0);
        sections.push(format!(
            "### Memory\n{} memories ({} new in 24h, {} long-term), {} knowledge facts",
            stats.memories, new_memories, stats.long_term, stats.facts
        ));
    }

    // Budget
    if let Ok(usage) = store.usage_since(&day_ago) {
        let total = usage.input_tokens + usage.output_tokens;
        let pct = if daily_token_budget > 0 {
            total as f64 / daily_token_budget as f64 * 100.0
        } else {
            0.0
        };
        sections.push(format!(
            "### Budget\n{} calls, {} tokens in 24h ({pct:.1}% of {daily_token_budget}), {} failures",
            usage.calls, total, usage.failures
        ));
    }

    sections.join("\n\n")
}

/// Mine the memory graph for idea candidates: frequently linked topics,
/// recent high-importance memories, and intentions not tracked anywhere.
pub fn surface_ideas(store: &MemoryStore, projects: &ProjectManager) -> String {
    let two_weeks_ago = (Utc::now() - Duration::days(14)).to_rfc3339();
    let mut sections = vec!["## Idea Surfacing".to_string()];

    let linked = store.top_linked_memories(5).unwrap_or_default();
    if !linked.is_empty() {
        let lines: Vec<String> = linked
            .iter()
            .map(|(content, count)| {
                let preview: String = content.chars().take(100).collect();
                format!("- ({count} connections) {preview}")
            })
            .collect();
        sections.push(format!("### Frequently linked topics\n{}", lines.join("\n")));
    }

    let important = store.high_importance_since(&two_weeks_ago, 0.7, 10).unwrap_or_default();
    if !important.is_empty() {
        let lines: Vec<String> = important
            .iter()
            .map(|m| {
                let preview: String = m.content.chars().take(80).collect();
                format!("- [{:.1}] {preview}", m.importance)
            })
            .collect();
        sections.push(format!("### High-importance recently\n{}", lines.join("\n")));
    }

    // Intentions mentioned in memory but absent from projects and backlog
    let mut known: Vec<String> = Vec::new();
    if let Ok(ideas) = projects.list_ideas(None) {
        known.extend(ideas.into_iter().map(|i| i.title.to_lowercase()));
    }
    if let Ok(Some(project)) = projects.active_project() {
        known.push(project.name.to_lowercase());
    }

    let threads: Vec<String> = important
        .iter()
        .filter(|m| {
            let lower = m.content.to_lowercase();
            THREAD_KEYWORDS.iter().any(|k| lower.contains(k)) && !known.iter().any(|name| !name.is_empty() && lower.contains(name))
        })
        .map(|m| {
            let preview: String = m.content.chars().take(120).collect();
            format!("- {preview}")
        })
        .collect();
    if !threads.is_empty() {
        sections.push(format!(
            "### Possible dropped threads\n{}\n\nSay 'idea: ...' to add any of these to the backlog.",
            threads.join("\n")
        ));
    }

    if sections.len() == 1 {
        sections.push("Nothing noteworthy this week.".to_string());
    }
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use memstore::{MemoryEntry, MemoryLink, UsageRecord};
    use tempfile::TempDir;

    fn fixtures(temp: &TempDir) -> (MemoryStore, ProjectManager) {
        (
            MemoryStore::open(temp.path().join("memory.db")).unwrap(),
            ProjectManager::open(temp.path().join("projects.db")).unwrap(),
        )
    }

    #[test]
    fn test_brief_on_empty_stores() {
        let temp = TempDir::new().unwrap();
        let (store, projects) = fixtures(&temp);

        let brief = morning_brief(&store, &projects, 1_000_000);
        assert!(brief.contains("Morning Brief"));
        assert!(brief.contains("None"));
        assert!(brief.contains("Completed: 0"));
    }

    #[test]
    fn test_brief_reports_usage_and_tasks() {
        let temp = TempDir::new().unwrap();
        let (store, projects) = fixtures(&temp);

        store
            .log_usage(&UsageRecord {
                agent: "brain".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                provider: "anthropic".to_string(),
                input_tokens: 400,
                output_tokens: 100,
                duration_ms: 500,
                success: true,
                error: None,
            })
            .unwrap();

        let project = projects.create_project("demo", "d", "s").unwrap();
        let task = crate::project::Task::new(&project.id, "Ship it", "builder", 1);
        projects.decompose_into_tasks(&project.id, &[task.clone()]).unwrap();
        projects.complete_task(&task.id, "shipped").unwrap();

        let brief = morning_brief(&store, &projects, 1000);
        assert!(brief.contains("Completed: 1"));
        assert!(brief.contains("Ship it"));
        assert!(brief.contains("500 tokens"));
        assert!(brief.contains("50.0%"));
    }

    #[test]
    fn test_surface_ideas_finds_threads() {
        let temp = TempDir::new().unwrap();
        let (store, projects) = fixtures(&temp);

        let mut entry = MemoryEntry::new("we should improve the backup story", "brain").with_importance(0.9);
        entry.embedding = None;
        store.insert_memory(&entry).unwrap();

        let other = MemoryEntry::new("linked hub", "brain");
        store.insert_memory(&other).unwrap();
        store.add_link(&MemoryLink::new(other.id.clone(), entry.id.clone(), "related_to", 1.0)).unwrap();
        store.add_link(&MemoryLink::new(other.id.clone(), "x", "related_to", 1.0)).unwrap();

        let report = surface_ideas(&store, &projects);
        assert!(report.contains("backup story"));
        assert!(report.contains("Frequently linked topics"));
    }
}
