//! The Brain: sole user-facing coordinator

use std::sync::Arc;
use tracing::{error, info, warn};

use memstore::{MemoryEngine, Strategy};
use msgbus::MessageBus;

use super::classify::{Intent, classify};
use super::dag::execute_dag;
use super::gate::gate_memory;
use super::history::ConversationHistory;
use super::router::route_project;
use super::synthesis::{synthesize_multi, synthesize_single};
use crate::config::Config;
use crate::gitops::GitOps;
use crate::llm::{GenerationRequest, LlmApi, extract_json};
use crate::project::ProjectManager;
use crate::session::Delegator;

const BRAIN_SYSTEM_PROMPT: &str = "You are the orchestrator of a personal assistant. \
    You are the only voice the user hears. Be helpful, direct, and conversational.";

/// Retrieval depth for direct replies
const MEMORY_TOP_K: usize = 5;

/// The inbound message shape from any transport
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub message: String,
    pub conversation_id: String,
}

/// One turn's outcome
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub intent: Intent,
    pub delegated: bool,
    pub error: Option<String>,
    pub agent_results: Option<serde_json::Value>,
    pub project_id: Option<String>,
}

impl TurnOutcome {
    fn direct(response: String, intent: Intent) -> Self {
        Self {
            response,
            intent,
            delegated: false,
            error: None,
            agent_results: None,
            project_id: None,
        }
    }
}

/// The orchestrator. Holds the conversation ring and every downstream
/// handle; one `handle` call processes one user turn end to end.
pub struct Brain {
    config: Config,
    llm: Arc<dyn LlmApi>,
    delegator: Arc<dyn Delegator>,
    engine: MemoryEngine,
    bus: Arc<MessageBus>,
    projects: ProjectManager,
    gitops: GitOps,
    history: ConversationHistory,
}

impl Brain {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmApi>,
        delegator: Arc<dyn Delegator>,
        engine: MemoryEngine,
        bus: Arc<MessageBus>,
        projects: ProjectManager,
    ) -> Self {
        let gitops = GitOps::new(config.session.workspace_dir.clone());
        Self {
            config,
            llm,
            delegator,
            engine,
            bus,
            projects,
            gitops,
            history: ConversationHistory::new(),
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn projects(&self) -> &ProjectManager {
        &self.projects
    }

    pub fn engine(&self) -> &MemoryEngine {
        &self.engine
    }

    /// Handle one user message: classify, route, synthesize, gate memory.
    /// Nothing escapes; unexpected failures produce an apology outcome.
    pub async fn handle(&mut self, incoming: IncomingMessage) -> TurnOutcome {
        let message = incoming.message.clone();
        self.history.push_user(&message);

        let outcome = match self.route(&message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Turn pipeline failed");
                TurnOutcome {
                    response: "I hit an unexpected issue handling that - could you try again?".to_string(),
                    intent: Intent::SimpleChat,
                    delegated: false,
                    error: Some(e.to_string()),
                    agent_results: None,
                    project_id: None,
                }
            }
        };

        self.history.push_assistant(&outcome.response);

        // Memory gating is best-effort and never blocks the reply
        gate_memory(self.llm.as_ref(), &self.engine, &message, &outcome.response).await;

        outcome
    }

    async fn route(&mut self, message: &str) -> eyre::Result<TurnOutcome> {
        let classification = classify(self.llm.as_ref(), message, &self.history.recent_context(3)).await;
        info!(intent = classification.intent.as_str(), confidence = classification.confidence, "Classified turn");

        let outcome = match classification.intent {
            Intent::SimpleChat => self.handle_direct(message).await,
            Intent::BuildRequest => self.handle_single_agent(message, "builder", Intent::BuildRequest).await,
            Intent::FactualQuestion => self.handle_single_agent(message, "verifier", Intent::FactualQuestion).await,
            Intent::ResearchRequest => self.handle_single_agent(message, "researcher", Intent::ResearchRequest).await,
            Intent::IdeaSuggestion => self.handle_idea(message),
            Intent::ProjectRequest => {
                let (response, project_id) = route_project(
                    self.llm.as_ref(),
                    self.delegator.as_ref(),
                    &self.projects,
                    &self.bus,
                    &self.gitops,
                    Some(self.engine.store()),
                    message,
                )
                .await;
                TurnOutcome {
                    response,
                    intent: Intent::ProjectRequest,
                    delegated: true,
                    error: None,
                    agent_results: None,
                    project_id,
                }
            }
            Intent::ComplexTask => {
                if classification.subtasks.is_empty() {
                    warn!("Complex task with no subtasks, handling directly");
                    self.handle_direct(message).await
                } else {
                    self.handle_complex(message, &classification.subtasks).await
                }
            }
        };

        Ok(outcome)
    }

    /// Direct reply from conversation history plus retrieved memories.
    async fn handle_direct(&self, message: &str) -> TurnOutcome {
        let memory_context = self.memory_context(message);

        let mut system = BRAIN_SYSTEM_PROMPT.to_string();
        if !memory_context.is_empty() {
            system.push_str(&format!("\n\nRelevant context from past interactions:\n{memory_context}"));
        }

        let request = GenerationRequest::default()
            .with_system(system)
            .with_messages(self.history.for_prompt(self.config.context.max_tokens))
            .with_temperature(0.7)
            .with_agent("brain");

        match self.llm.generate(request).await {
            Ok(response) => TurnOutcome::direct(response.content, Intent::SimpleChat),
            Err(e) => {
                error!(error = %e, "Direct handling failed");
                TurnOutcome {
                    response: "I ran into a problem generating a response. Could you rephrase that?".to_string(),
                    intent: Intent::SimpleChat,
                    delegated: false,
                    error: Some(e.to_string()),
                    agent_results: None,
                    project_id: None,
                }
            }
        }
    }

    /// Delegate to one specialist, then synthesize its output. Delegation
    /// failure falls back to a direct answer with an acknowledgement.
    async fn handle_single_agent(&self, message: &str, agent: &str, intent: Intent) -> TurnOutcome {
        let context = self.scoped_context(agent, message);

        let reply = self.delegator.delegate(agent, message, context, None).await;
        if !reply.success {
            warn!(agent, error = ?reply.error, "Delegation failed, answering directly");
            let mut outcome = self.handle_direct(message).await;
            outcome.response.push_str(&format!("\n\n(The {agent} specialist wasn't available, so this is my best direct answer.)"));
            outcome.intent = intent;
            return outcome;
        }

        let agent_result = extract_json(&reply.result).unwrap_or_else(|| serde_json::json!({"content": reply.result}));
        let synthesized = synthesize_single(
            self.llm.as_ref(),
            message,
            agent,
            &agent_result,
            self.history.recent(6),
            BRAIN_SYSTEM_PROMPT,
        )
        .await;

        match synthesized {
            Ok(response) => {
                let detail: String = message.chars().take(120).collect();
                let _ = self.engine.store().log_activity("delegation", agent, &detail);
                TurnOutcome {
                    response,
                    intent,
                    delegated: true,
                    error: None,
                    agent_results: Some(serde_json::json!({agent: agent_result})),
                    project_id: None,
                }
            }
            Err(e) => {
                let mut outcome = self.handle_direct(message).await;
                outcome.intent = intent;
                outcome.error = Some(e);
                outcome
            }
        }
    }

    /// Layered multi-agent execution plus synthesis.
    async fn handle_complex(&self, message: &str, subtasks: &[super::classify::Subtask]) -> TurnOutcome {
        let results = execute_dag(self.delegator.as_ref(), subtasks, message).await;

        let response = synthesize_multi(
            self.llm.as_ref(),
            message,
            &results,
            self.history.recent(6),
            BRAIN_SYSTEM_PROMPT,
        )
        .await;

        let agent_results: serde_json::Value = results
            .iter()
            .map(|(key, outcome)| {
                (
                    key.clone(),
                    serde_json::json!({
                        "agent": outcome.agent,
                        "action": outcome.action,
                        "status": if outcome.completed { "completed" } else { "failed" },
                        "result": outcome.result,
                        "error": outcome.error,
                    }),
                )
            })
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into();

        TurnOutcome {
            response,
            intent: Intent::ComplexTask,
            delegated: true,
            error: None,
            agent_results: Some(agent_results),
            project_id: None,
        }
    }

    /// Capture an idea into the backlog.
    fn handle_idea(&self, message: &str) -> TurnOutcome {
        let title = idea_title(message);
        match self.projects.add_idea(&title, message, None) {
            Ok(idea) => TurnOutcome::direct(
                format!(
                    "Saved '{}' to your idea backlog. Say 'show ideas' to review it or 'promote idea N' to start building.",
                    idea.title
                ),
                Intent::IdeaSuggestion,
            ),
            Err(e) => TurnOutcome {
                response: format!("I couldn't save that idea: {e}"),
                intent: Intent::IdeaSuggestion,
                delegated: false,
                error: Some(e.to_string()),
                agent_results: None,
                project_id: None,
            },
        }
    }

    /// Known facts and relevant memories formatted for the system prompt.
    fn memory_context(&self, query: &str) -> String {
        let results = match self.engine.retrieve_with_facts(query, Strategy::Balanced, MEMORY_TOP_K) {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "Memory retrieval failed");
                return String::new();
            }
        };

        let mut parts = Vec::new();
        let facts: Vec<&memstore::RetrievedItem> =
            results.iter().filter(|r| r.kind == memstore::ItemKind::Fact).collect();
        let memories: Vec<&memstore::RetrievedItem> =
            results.iter().filter(|r| r.kind == memstore::ItemKind::Memory).collect();

        if !facts.is_empty() {
            let lines: Vec<String> = facts.iter().map(|f| format!("- {}", f.content)).collect();
            parts.push(format!("Known facts:\n{}", lines.join("\n")));
        }
        if !memories.is_empty() {
            let lines: Vec<String> = memories.iter().map(|m| format!("- [{:.2}] {}", m.score, m.content)).collect();
            parts.push(format!("Relevant past context:\n{}", lines.join("\n")));
        }
        parts.join("\n\n")
    }

    /// Scoped context per agent role - each specialist sees only what it
    /// needs.
    fn scoped_context(&self, agent: &str, message: &str) -> serde_json::Value {
        match agent {
            "builder" => serde_json::json!({
                "scope": "builder",
                "conversation": self.history.recent(6).iter().map(|m| {
                    serde_json::json!({"role": m.role.as_str(), "content": m.content})
                }).collect::<Vec<_>>(),
            }),
            "verifier" => {
                let excerpts: Vec<String> = self
                    .engine
                    .retrieve_with_facts(message, Strategy::Balanced, MEMORY_TOP_K)
                    .map(|results| results.into_iter().map(|r| r.content).collect())
                    .unwrap_or_default();
                serde_json::json!({
                    "scope": "verifier",
                    "claims": [message],
                    "knowledge_excerpts": excerpts,
                })
            }
            _ => serde_json::json!({
                "scope": agent,
                "query": message,
            }),
        }
    }
}

/// Derive a backlog title by stripping the idea trigger phrase.
fn idea_title(message: &str) -> String {
    const STRIP: &[&str] = &[
        "we should build",
        "idea:",
        "what if we",
        "maybe we could",
        "how about we build",
        "here's an idea",
    ];

    let mut title = message.trim().to_string();
    let lower = title.to_lowercase();
    for phrase in STRIP {
        if let Some(pos) = lower.find(phrase) {
            title = title[pos + phrase.len()..].trim().to_string();
            break;
        }
    }
    if title.is_empty() {
        title = message.trim().to_string();
    }
    let mut title: String = title.chars().take(80).collect();
    if title.ends_with('.') || title.ends_with('!') || title.ends_with('?') {
        title.pop();
    }
    title
}
