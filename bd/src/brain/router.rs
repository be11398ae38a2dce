//! Project sub-router: commands, continuation, and new-project kickoff

use tracing::{info, warn};

use msgbus::MessageBus;

use super::decompose::decompose_spec;
use super::pipeline::run_task_pipeline;
use super::spec_writer::write_spec;
use crate::gitops::GitOps;
use crate::llm::LlmApi;
use crate::project::{Project, ProjectManager, detect_backlog_query};
use crate::session::Delegator;

/// What the sub-router decided to do with the utterance
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProjectCommand {
    PromoteIdea(usize),
    ArchiveIdea(usize),
    Status,
    Pause,
    Cancel,
    Backlog,
    Other,
}

fn parse_command(message: &str) -> ProjectCommand {
    let lower = message.to_lowercase();

    if let Some(n) = trailing_number(&lower, "promote idea") {
        return ProjectCommand::PromoteIdea(n);
    }
    if let Some(n) = trailing_number(&lower, "archive idea") {
        return ProjectCommand::ArchiveIdea(n);
    }
    if detect_backlog_query(&lower) {
        return ProjectCommand::Backlog;
    }
    if lower.contains("status") || lower.contains("progress") || lower.contains("how's the project") {
        return ProjectCommand::Status;
    }
    if lower.contains("cancel") {
        return ProjectCommand::Cancel;
    }
    if lower.contains("pause") {
        return ProjectCommand::Pause;
    }
    ProjectCommand::Other
}

/// The 1-based index after a command phrase, e.g. "promote idea 2".
fn trailing_number(lower: &str, phrase: &str) -> Option<usize> {
    let rest = lower.split(phrase).nth(1)?;
    rest.split_whitespace().next()?.trim_matches(|c: char| !c.is_ascii_digit()).parse().ok()
}

/// Route a project-intent utterance. Returns the user-facing reply and the
/// project involved, if any.
pub async fn route_project(
    llm: &dyn LlmApi,
    delegator: &dyn Delegator,
    projects: &ProjectManager,
    bus: &MessageBus,
    gitops: &GitOps,
    activity: Option<&memstore::MemoryStore>,
    message: &str,
) -> (String, Option<String>) {
    match parse_command(message) {
        ProjectCommand::PromoteIdea(n) => promote_and_start(llm, delegator, projects, bus, gitops, activity, n).await,
        ProjectCommand::ArchiveIdea(n) => {
            let reply = match nth_idea(projects, n) {
                Some(idea) => match projects.archive_idea(&idea.id) {
                    Ok(()) => format!("Archived '{}'.", idea.title),
                    Err(e) => format!("Couldn't archive that idea: {e}"),
                },
                None => format!("There's no idea #{n} in the backlog."),
            };
            (reply, None)
        }
        ProjectCommand::Backlog => {
            let reply = projects
                .backlog_summary()
                .unwrap_or_else(|e| format!("Couldn't read the backlog: {e}"));
            (reply, None)
        }
        ProjectCommand::Status => match projects.active_project() {
            Ok(Some(project)) => {
                let reply = match projects.get_full_status(&project.id) {
                    Ok(status) => {
                        let mut lines = vec![format!("**{}** - {}", status.name, status.progress)];
                        for feature in &status.features {
                            let current = feature
                                .current_task
                                .as_deref()
                                .map(|t| format!(" (next: {t})"))
                                .unwrap_or_default();
                            lines.push(format!("- {} [{}] {}{current}", feature.name, feature.tasks, feature.status));
                        }
                        lines.join("\n")
                    }
                    Err(e) => format!("Couldn't read project status: {e}"),
                };
                (reply, Some(project.id))
            }
            _ => ("There's no active project right now.".to_string(), None),
        },
        ProjectCommand::Pause | ProjectCommand::Cancel => match projects.active_project() {
            Ok(Some(project)) => {
                let verb = if parse_command(message) == ProjectCommand::Cancel {
                    "Cancelled"
                } else {
                    "Paused"
                };
                let reply = match projects.update_project_status(&project.id, "paused") {
                    Ok(()) => format!("{verb} '{}'. Say 'new project' when you want to start something.", project.name),
                    Err(e) => format!("Couldn't update the project: {e}"),
                };
                (reply, Some(project.id))
            }
            _ => ("There's no active project to stop.".to_string(), None),
        },
        ProjectCommand::Other => match projects.active_project() {
            Ok(Some(project)) if project.status == "in_progress" => {
                advance_project(llm, delegator, projects, bus, gitops, activity, &project).await
            }
            Ok(Some(project)) => {
                // A planning project without tasks yet: fill it in and start
                start_planning_project(llm, delegator, projects, bus, gitops, activity, project, message).await
            }
            _ => new_project(llm, delegator, projects, bus, gitops, activity, message).await,
        },
    }
}

fn nth_idea(projects: &ProjectManager, n: usize) -> Option<crate::project::Idea> {
    let ideas = projects.list_ideas(None).ok()?;
    (n >= 1).then(|| ideas.get(n - 1).cloned()).flatten()
}

async fn promote_and_start(
    llm: &dyn LlmApi,
    delegator: &dyn Delegator,
    projects: &ProjectManager,
    bus: &MessageBus,
    gitops: &GitOps,
    activity: Option<&memstore::MemoryStore>,
    n: usize,
) -> (String, Option<String>) {
    let Some(idea) = nth_idea(projects, n) else {
        return (format!("There's no idea #{n} in the backlog."), None);
    };

    let project = match projects.promote_idea(&idea.id) {
        Ok(project) => project,
        Err(e) => {
            warn!(error = %e, "Idea promotion refused");
            return (format!("Can't start that yet: {e}"), None);
        }
    };

    let description = if idea.description.is_empty() { idea.title.clone() } else { idea.description.clone() };
    start_planning_project(llm, delegator, projects, bus, gitops, activity, project, &description).await
}

/// Fill in the spec, decompose, and run the first task of a planning
/// project.
async fn start_planning_project(
    llm: &dyn LlmApi,
    delegator: &dyn Delegator,
    projects: &ProjectManager,
    bus: &MessageBus,
    gitops: &GitOps,
    activity: Option<&memstore::MemoryStore>,
    project: Project,
    idea_text: &str,
) -> (String, Option<String>) {
    // A configured search backend enriches the spec; none is fine
    let research = research_idea(idea_text).await;
    let spec = write_spec(llm, idea_text, research.as_deref()).await;
    if let Err(e) = projects.update_project_spec(&project.id, &spec) {
        return (format!("Couldn't save the project spec: {e}"), Some(project.id));
    }
    let project = projects.get_project(&project.id).ok().flatten().unwrap_or(project);

    let decomposed = decompose_spec(llm, &project.id, &spec).await;
    let mut all_tasks = Vec::new();
    for entry in &decomposed {
        if let Err(e) = projects.add_features(&project.id, std::slice::from_ref(&entry.feature)) {
            return (format!("Couldn't store features: {e}"), Some(project.id.clone()));
        }
        all_tasks.extend(entry.tasks.iter().cloned());
    }
    if let Err(e) = projects.decompose_into_tasks(&project.id, &all_tasks) {
        return (format!("Couldn't store tasks: {e}"), Some(project.id.clone()));
    }

    info!(project = %project.id, tasks = all_tasks.len(), "Project planned");
    let (first_report, _) = advance_project(llm, delegator, projects, bus, gitops, activity, &project).await;
    let reply = format!(
        "Started '{}' with {} tasks across {} feature(s).\n{first_report}",
        project.name,
        all_tasks.len(),
        decomposed.len(),
    );
    (reply, Some(project.id.clone()))
}

/// Top search snippets for the idea, when a backend is configured.
async fn research_idea(idea_text: &str) -> Option<String> {
    let search = crate::search::WebSearch::from_env();
    if !search.is_available() {
        return None;
    }

    let response = search.search(idea_text, 5).await;
    if !response.success() {
        return None;
    }

    let lines: Vec<String> = response
        .results
        .iter()
        .map(|r| format!("- {} ({}): {}", r.title, r.url, r.snippet))
        .collect();
    Some(lines.join("\n"))
}

async fn new_project(
    llm: &dyn LlmApi,
    delegator: &dyn Delegator,
    projects: &ProjectManager,
    bus: &MessageBus,
    gitops: &GitOps,
    activity: Option<&memstore::MemoryStore>,
    message: &str,
) -> (String, Option<String>) {
    let name: String = message.chars().take(60).collect();
    let project = match projects.create_project(&name, message, "") {
        Ok(project) => project,
        Err(e) => return (format!("Can't start a new project: {e}"), None),
    };
    start_planning_project(llm, delegator, projects, bus, gitops, activity, project, message).await
}

/// Advance an in-progress project by one task.
async fn advance_project(
    llm: &dyn LlmApi,
    delegator: &dyn Delegator,
    projects: &ProjectManager,
    bus: &MessageBus,
    gitops: &GitOps,
    activity: Option<&memstore::MemoryStore>,
    project: &Project,
) -> (String, Option<String>) {
    let next = match projects.get_next_task(&project.id) {
        Ok(Some(task)) => task,
        Ok(None) => {
            let status = projects.get_status(&project.id);
            let reply = match status {
                Ok(status) if !status.blockers.is_empty() => {
                    format!("'{}' is stuck:\n{}", project.name, status.blockers.join("\n"))
                }
                Ok(status) if status.completed_tasks == status.total_tasks && status.total_tasks > 0 => {
                    format!("'{}' is complete - all {} tasks done.", project.name, status.total_tasks)
                }
                _ => format!("'{}' has no actionable tasks right now.", project.name),
            };
            return (reply, Some(project.id.clone()));
        }
        Err(e) => return (format!("Couldn't pick the next task: {e}"), Some(project.id.clone())),
    };

    let outcome = run_task_pipeline(llm, delegator, projects, bus, gitops, activity, project, &next).await;
    let mut reply = outcome.report;
    for warning in &outcome.warnings {
        reply.push_str(&format!("\n⚠ {warning}"));
    }
    (reply, Some(project.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("promote idea 1"), ProjectCommand::PromoteIdea(1));
        assert_eq!(parse_command("please promote idea 12 now"), ProjectCommand::PromoteIdea(12));
        assert_eq!(parse_command("archive idea 3"), ProjectCommand::ArchiveIdea(3));
        assert_eq!(parse_command("show ideas"), ProjectCommand::Backlog);
        assert_eq!(parse_command("what's the project status?"), ProjectCommand::Status);
        assert_eq!(parse_command("pause the project"), ProjectCommand::Pause);
        assert_eq!(parse_command("cancel this project"), ProjectCommand::Cancel);
        assert_eq!(parse_command("keep going"), ProjectCommand::Other);
    }

    #[test]
    fn test_trailing_number() {
        assert_eq!(trailing_number("promote idea 7", "promote idea"), Some(7));
        assert_eq!(trailing_number("promote idea #2", "promote idea"), Some(2));
        assert_eq!(trailing_number("promote idea", "promote idea"), None);
        assert_eq!(trailing_number("promote idea soon", "promote idea"), None);
    }
}
