//! The per-task pipeline: research -> build -> verify -> guard -> commit

use tracing::{info, warn};

use msgbus::{AgentRole, BusMessage, MessageBus, MessageStatus};

use crate::gitops::GitOps;
use crate::llm::{GenerationRequest, LlmApi, extract_json};
use crate::project::{Project, ProjectManager, Task};
use crate::session::Delegator;

/// Builder gets this many revision attempts after verifier FAILs
const MAX_RETRIES: usize = 2;

/// Stored task results are truncated to this many characters
const RESULT_SNAPSHOT_CHARS: usize = 2000;

/// Task text containing any of these gets a researcher pre-step
const RESEARCH_TRIGGERS: &[&str] = &[
    "best practice",
    "architecture",
    "design",
    "compare",
    "evaluate",
    "research",
    "investigate",
    "security",
    "performance",
    "scalable",
    "pattern",
    "framework",
];

/// Outcome of running one task through the pipeline
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub task_id: String,
    pub task_title: String,
    pub success: bool,
    /// User-facing progress or failure notice
    pub report: String,
    pub warnings: Vec<String>,
}

fn wants_research(task: &Task) -> bool {
    let text = format!("{} {}", task.title, task.description).to_lowercase();
    RESEARCH_TRIGGERS.iter().any(|t| text.contains(t))
}

fn verifier_task_text(task: &Task, builder_output: &str) -> String {
    format!(
        "Review the builder's output for this task and decide PASS or FAIL.\n\n\
         Task: {}\n{}\n\nBuilder output:\n{}\n\n\
         Respond with ONLY this JSON:\n\
         {{\"verdict\": \"PASS|FAIL\", \"issues\": [\"<problem>\"], \"notes\": \"<review notes>\"}}",
        task.title, task.description, builder_output
    )
}

fn guardian_task_text(task: &Task, builder_output: &str) -> String {
    format!(
        "Security-review the builder's output for this task.\n\n\
         Task: {}\n\nBuilder output:\n{}\n\n\
         Respond with ONLY this JSON:\n\
         {{\"verdict\": \"PASS|FLAG|BLOCK\", \"severity\": \"critical|high|medium|low|info\", \
         \"recommendations\": [\"<fix>\"]}}",
        task.title, builder_output
    )
}

/// Run one actionable task through the full pipeline. Every exit path
/// leaves the task in a terminal or failed state and returns a user-facing
/// report.
pub async fn run_task_pipeline(
    llm: &dyn LlmApi,
    delegator: &dyn Delegator,
    projects: &ProjectManager,
    bus: &MessageBus,
    gitops: &GitOps,
    activity: Option<&memstore::MemoryStore>,
    project: &Project,
    task: &Task,
) -> PipelineOutcome {
    let mut warnings = Vec::new();

    if let Err(e) = projects.set_task_in_progress(&task.id) {
        return failure(task, format!("Could not start task: {e}"), warnings);
    }

    // Research pre-step; failure just means empty context
    let mut research_context = String::new();
    if wants_research(task) {
        let reply = delegator
            .delegate(
                "researcher",
                &format!("Research for this task: {}\n{}", task.title, task.description),
                serde_json::json!({"scope": "researcher", "query": task.description}),
                None,
            )
            .await;
        if reply.success {
            research_context = reply.result;
        } else {
            warn!(task = %task.id, "Research pre-step failed (non-fatal)");
        }
    }

    // Builder attempt
    let build_task_text = format!(
        "{}\n\n{}\n\nProject spec:\n{}{}",
        task.title,
        task.description,
        project.spec,
        if research_context.is_empty() {
            String::new()
        } else {
            format!("\n\nResearch context:\n{research_context}")
        }
    );
    let build = delegator
        .delegate(
            "builder",
            &build_task_text,
            serde_json::json!({"scope": "builder", "project": project.name}),
            None,
        )
        .await;
    if !build.success {
        let reason = build.error.unwrap_or_else(|| "builder failed".to_string());
        let _ = projects.fail_task(&task.id, &reason);
        return failure(task, format!("Builder failed on '{}': {reason}", task.title), warnings);
    }
    let mut builder_output = build.result;

    // Surface the builder result on the bus so the interceptor sees it
    let build_msg = BusMessage::new(AgentRole::Builder, AgentRole::Brain, "build_result");
    let bus_ok = bus.send(&build_msg).is_ok()
        && bus
            .update_status(
                &build_msg.task_id,
                MessageStatus::Completed,
                Some(&serde_json::json!({"content": builder_output, "task": task.title})),
                None,
            )
            .is_ok();

    // Verifier loop with bounded builder revisions
    let mut retries = 0usize;
    loop {
        let review = delegator
            .delegate(
                "verifier",
                &verifier_task_text(task, &builder_output),
                serde_json::json!({"scope": "verifier", "claims": [task.title]}),
                None,
            )
            .await;

        // An unavailable verifier doesn't hold up the pipeline
        if !review.success {
            warnings.push(format!("Verifier unavailable for '{}'", task.title));
            break;
        }

        let parsed = extract_json(&review.result).unwrap_or_default();
        let verdict = parsed["verdict"].as_str().unwrap_or("PASS").to_uppercase();
        if verdict != "FAIL" {
            break;
        }

        let issues: Vec<String> = parsed["issues"]
            .as_array()
            .map(|items| items.iter().filter_map(|i| i.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let notes = parsed["notes"].as_str().unwrap_or("");

        if retries >= MAX_RETRIES {
            let reason = format!("verification failed after {} attempts: {}", retries + 1, issues.join("; "));
            let _ = projects.fail_task(&task.id, &reason);
            return failure(
                task,
                format!("'{}' failed verification after {} attempts. Issues: {}", task.title, retries + 1, issues.join("; ")),
                warnings,
            );
        }

        retries += 1;
        info!(task = %task.id, retry = retries, "Verifier FAIL, requesting builder revision");
        let revision = delegator
            .delegate(
                "builder",
                &format!(
                    "Revise your previous output for task '{}'.\n\nVerifier notes: {notes}\nIssues:\n- {}\n\nPrevious output:\n{builder_output}",
                    task.title,
                    issues.join("\n- "),
                ),
                serde_json::json!({"scope": "builder", "revision": retries}),
                None,
            )
            .await;
        if !revision.success {
            let reason = revision.error.unwrap_or_else(|| "builder revision failed".to_string());
            let _ = projects.fail_task(&task.id, &reason);
            return failure(task, format!("Builder revision failed on '{}': {reason}", task.title), warnings);
        }
        builder_output = revision.result;
    }

    // Guardian review of the final output
    let guard = delegator
        .delegate(
            "guardian",
            &guardian_task_text(task, &builder_output),
            serde_json::json!({"scope": "guardian", "source_agent": "builder"}),
            None,
        )
        .await;
    if guard.success {
        let parsed = extract_json(&guard.result).unwrap_or_default();
        let verdict = parsed["verdict"].as_str().unwrap_or("PASS").to_uppercase();
        match verdict.as_str() {
            "BLOCK" => {
                let severity = parsed["severity"].as_str().unwrap_or("critical");
                let recommendations: Vec<String> = parsed["recommendations"]
                    .as_array()
                    .map(|items| items.iter().filter_map(|r| r.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                let reason = format!("blocked by security scan ({severity}): {}", recommendations.join("; "));
                let _ = projects.fail_task(&task.id, &reason);
                return failure(task, format!("'{}' was {reason}", task.title), warnings);
            }
            "FLAG" => warnings.push(format!("Guardian flagged '{}': review recommended", task.title)),
            _ => {}
        }
    }

    // The bus-level interceptor may have blocked the surfaced result
    if bus_ok
        && let Ok(Some(latest)) = bus.get_task(&build_msg.task_id)
        && latest.status == MessageStatus::Blocked
    {
        let reason = format!(
            "blocked by security scan: {}",
            latest.error.unwrap_or_else(|| "guardian block".to_string())
        );
        let _ = projects.fail_task(&task.id, &reason);
        return failure(task, format!("'{}' was {reason}", task.title), warnings);
    }

    // Coherence check against previously completed tasks
    if let Ok(all_tasks) = projects.get_all_tasks(&task.project_id) {
        let prior: Vec<String> = all_tasks
            .iter()
            .filter(|t| t.status == "completed" && t.id != task.id)
            .filter_map(|t| t.result.as_ref().map(|r| {
                let snippet: String = r.chars().take(200).collect();
                format!("{}: {snippet}", t.title)
            }))
            .collect();
        if !prior.is_empty() {
            let request = GenerationRequest::prompt(format!(
                "Does this new result contradict or duplicate earlier completed work?\n\n\
                 Earlier tasks:\n{}\n\nNew result for '{}':\n{}\n\n\
                 Reply with exactly COHERENT, or one sentence describing the concern.",
                prior.join("\n"),
                task.title,
                builder_output.chars().take(1000).collect::<String>(),
            ))
            .with_temperature(0.2)
            .with_agent("brain");

            if let Ok(response) = llm.generate(request).await {
                let reply = response.content.trim();
                if !reply.eq_ignore_ascii_case("COHERENT") && !reply.is_empty() {
                    warnings.push(format!("Coherence concern on '{}': {reply}", task.title));
                }
            }
        }
    }

    // Complete and commit
    let snapshot: String = builder_output.chars().take(RESULT_SNAPSHOT_CHARS).collect();
    if let Err(e) = projects.complete_task(&task.id, &snapshot) {
        return failure(task, format!("Could not record completion: {e}"), warnings);
    }

    let feature_name = projects
        .get_features(&task.project_id)
        .ok()
        .and_then(|features| features.into_iter().find(|f| f.id == task.feature_id))
        .map(|f| f.title)
        .unwrap_or_else(|| project.name.clone());
    let commit_message = format!("feat({}): {}", slug(&feature_name), task.title);
    let _ = gitops.auto_commit(&commit_message).await;

    let (done, total) = projects
        .get_all_tasks(&task.project_id)
        .map(|tasks| {
            let done = tasks.iter().filter(|t| t.is_terminal()).count();
            (done, tasks.len())
        })
        .unwrap_or((0, 0));

    info!(task = %task.id, done, total, "Task pipeline complete");
    if let Some(store) = activity {
        let _ = store.log_activity("task_complete", &task.agent, &task.title);
    }
    PipelineOutcome {
        task_id: task.id.clone(),
        task_title: task.title.clone(),
        success: true,
        report: format!("Completed '{}' [{done}/{total}]", task.title),
        warnings,
    }
}

fn failure(task: &Task, report: String, warnings: Vec<String>) -> PipelineOutcome {
    PipelineOutcome {
        task_id: task.id.clone(),
        task_title: task.title.clone(),
        success: false,
        report,
        warnings,
    }
}

fn slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
