//! End-to-end turns through the Brain with scripted model and workers

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use braindaemon::brain::Intent;
use braindaemon::config::Config;
use braindaemon::llm::{GenerationRequest, LlmApi, LlmError, LlmResponse};
use braindaemon::session::{DelegationResult, DelegationTask, Delegator};
use braindaemon::{Brain, IncomingMessage};
use memstore::{MemoryEngine, MemoryStore};
use msgbus::MessageBus;

/// Scripted model: replies pop in order; an empty queue fails the call.
struct QueueLlm {
    replies: Mutex<VecDeque<String>>,
}

impl QueueLlm {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        })
    }
}

#[async_trait]
impl LlmApi for QueueLlm {
    async fn generate(&self, _request: GenerationRequest) -> Result<LlmResponse, LlmError> {
        match self.replies.lock().unwrap().pop_front() {
            Some(content) => Ok(LlmResponse {
                content,
                ..LlmResponse::default()
            }),
            None => Err(LlmError::Timeout {
                provider: "anthropic".to_string(),
                after: Duration::from_secs(60),
            }),
        }
    }
}

/// Worker sessions scripted per agent; unknown agents fail partially.
struct ScriptedWorkers {
    replies: Mutex<std::collections::HashMap<String, VecDeque<String>>>,
}

impl ScriptedWorkers {
    fn new(replies: &[(&str, &[&str])]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(
                replies
                    .iter()
                    .map(|(agent, seq)| (agent.to_string(), seq.iter().map(|s| s.to_string()).collect()))
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl Delegator for ScriptedWorkers {
    async fn delegate(
        &self,
        agent: &str,
        _task: &str,
        _context: serde_json::Value,
        _timeout: Option<Duration>,
    ) -> DelegationResult {
        match self.replies.lock().unwrap().get_mut(agent).and_then(|q| q.pop_front()) {
            Some(reply) => DelegationResult {
                agent: agent.to_string(),
                success: true,
                result: reply,
                session_key: "s".to_string(),
                error: None,
            },
            None => DelegationResult {
                agent: agent.to_string(),
                success: false,
                result: String::new(),
                session_key: "s".to_string(),
                error: Some("no scripted session".to_string()),
            },
        }
    }

    async fn delegate_parallel(&self, tasks: Vec<DelegationTask>, _default_timeout: Duration) -> Vec<DelegationResult> {
        let mut results = Vec::new();
        for t in tasks {
            results.push(self.delegate(&t.agent, &t.task, t.context, None).await);
        }
        results
    }
}

fn brain(temp: &TempDir, llm: Arc<dyn LlmApi>, workers: Arc<dyn Delegator>) -> Brain {
    let store = Arc::new(MemoryStore::open(temp.path().join("memory.db")).unwrap());
    let engine = MemoryEngine::new(store, None);
    let bus = Arc::new(MessageBus::open(temp.path().join("bus.db")).unwrap());
    let projects = braindaemon::ProjectManager::open(temp.path().join("projects.db")).unwrap();

    let mut config = Config::default();
    config.session.workspace_dir = temp.path().join("workspace");
    Brain::new(config, llm, workers, engine, bus, projects)
}

fn incoming(message: &str) -> IncomingMessage {
    IncomingMessage {
        message: message.to_string(),
        conversation_id: "it".to_string(),
    }
}

const NO_GATE: &str = r#"{"memories": [], "facts_for_cache": []}"#;

const DECOMPOSITION: &str = r#"{
    "features": [
        {
            "title": "Core",
            "description": "the whole thing",
            "tasks": [
                {"id": "task_1", "title": "Build the TUI", "description": "terminal UI",
                 "agent": "builder", "depends_on": [], "order": 1}
            ]
        }
    ]
}"#;

#[tokio::test]
async fn test_idea_to_completed_project() {
    let temp = TempDir::new().unwrap();

    // Turn 1 (idea): classify + gate.
    // Turn 2 (promote): classify, spec write, decomposition, coherence is
    // skipped (no prior completed tasks), then gate.
    let llm = QueueLlm::new(&[
        r#"{"intent": "idea_suggestion", "confidence": 0.9}"#,
        NO_GATE,
        r#"{"intent": "project_request", "confidence": 0.9}"#,
        "# Project: a TUI for todos\n\n## Overview\nA terminal todo list.",
        DECOMPOSITION,
        NO_GATE,
    ]);
    let workers = ScriptedWorkers::new(&[
        ("builder", &["built the TUI"]),
        ("verifier", &[r#"{"verdict": "PASS", "issues": [], "notes": "good"}"#]),
        ("guardian", &[r#"{"verdict": "PASS", "severity": "info", "recommendations": []}"#]),
    ]);
    let mut brain = brain(&temp, llm, workers);

    // Capture the idea
    let outcome = brain.handle(incoming("we should build a TUI for todos")).await;
    assert_eq!(outcome.intent, Intent::IdeaSuggestion);
    assert_eq!(brain.projects().list_ideas(None).unwrap().len(), 1);

    // Promote it; the router writes the spec, decomposes, and runs the
    // single task through builder/verifier/guardian
    let outcome = brain.handle(incoming("promote idea 1")).await;
    assert_eq!(outcome.intent, Intent::ProjectRequest);
    let project_id = outcome.project_id.expect("promotion yields a project");

    let project = brain.projects().get_project(&project_id).unwrap().unwrap();
    assert_eq!(project.status, "completed");
    assert!(project.spec.contains("a TUI for todos"));

    let full = brain.projects().get_full_status(&project_id).unwrap();
    assert_eq!(full.progress, "1/1 features done");

    // The promoted idea left the backlog
    assert!(brain.projects().list_ideas(None).unwrap().is_empty());
}

#[tokio::test]
async fn test_complex_task_carries_prior_results() {
    let temp = TempDir::new().unwrap();

    let llm = QueueLlm::new(&[
        r#"{"intent": "complex_task", "confidence": 0.9, "subtasks": [
            {"agent": "researcher", "action": "research", "description": "research X", "depends_on": []},
            {"agent": "builder", "action": "build", "description": "build Y from findings", "depends_on": [0]}
        ]}"#,
        "Combined the research and the build.",
        NO_GATE,
    ]);
    let workers = ScriptedWorkers::new(&[
        ("researcher", &[r#"{"content": "X is mostly turtles"}"#]),
        ("builder", &[r#"{"content": "built Y on turtles"}"#]),
    ]);
    let mut brain = brain(&temp, llm, workers);

    let outcome = brain.handle(incoming("research X, then build Y based on findings")).await;

    assert_eq!(outcome.intent, Intent::ComplexTask);
    let results = outcome.agent_results.unwrap();
    assert_eq!(results["researcher_research"]["status"], "completed");
    assert_eq!(results["builder_build"]["status"], "completed");
    assert_eq!(results["builder_build"]["result"]["content"], "built Y on turtles");
    assert_eq!(outcome.response, "Combined the research and the build.");
}

#[tokio::test]
async fn test_failed_verification_surfaces_and_project_survives() {
    let temp = TempDir::new().unwrap();

    let fail = r#"{"verdict": "FAIL", "issues": ["does not compile"], "notes": "broken"}"#;
    let llm = QueueLlm::new(&[
        r#"{"intent": "project_request", "confidence": 0.9}"#,
        "# Project: doomed\n\n## Overview\nIt will not verify.",
        DECOMPOSITION,
        NO_GATE,
    ]);
    let workers = ScriptedWorkers::new(&[
        ("builder", &["v1", "v2", "v3"]),
        ("verifier", &[fail, fail, fail]),
    ]);
    let mut brain = brain(&temp, llm, workers);

    let outcome = brain.handle(incoming("build me a doomed thing with many features")).await;

    assert!(outcome.response.contains("failed verification"));
    let project_id = outcome.project_id.unwrap();
    // The project is not completed; the failed task is recorded
    let project = brain.projects().get_project(&project_id).unwrap().unwrap();
    assert_eq!(project.status, "in_progress");
    let tasks = brain.projects().get_all_tasks(&project_id).unwrap();
    assert_eq!(tasks[0].status, "failed");
}

#[tokio::test]
async fn test_specialist_unavailable_falls_back_to_direct() {
    let temp = TempDir::new().unwrap();

    let llm = QueueLlm::new(&[
        r#"{"intent": "research_request", "confidence": 0.9}"#,
        "Here's what I know off the top of my head.",
        NO_GATE,
    ]);
    // No researcher scripted: delegation fails
    let workers = ScriptedWorkers::new(&[]);
    let mut brain = brain(&temp, llm, workers);

    let outcome = brain.handle(incoming("find out about subterranean fungi markets")).await;

    assert_eq!(outcome.intent, Intent::ResearchRequest);
    assert!(outcome.response.contains("off the top of my head"));
    assert!(outcome.response.contains("researcher specialist wasn't available"));
}
