//! BrainDaemon - multi-agent assistant orchestrator
//!
//! The brain receives user messages, classifies intent, and routes each turn:
//! direct replies for chat, single delegations to specialist worker sessions,
//! layered parallel execution for multi-agent task graphs, and a full project
//! pipeline (spec -> features -> tasks -> builder/verifier/guardian loop).
//! Every turn ends with a memory-gating pass into the shared store, and all
//! bus traffic is scanned by the guardian interceptor.
//!
//! # Modules
//!
//! - [`llm`] - multi-provider LLM client with retry policy and usage tracking
//! - [`session`] - child-process delegation to worker sessions
//! - [`project`] - project/feature/task/idea state machine
//! - [`brain`] - the orchestrator pipeline
//! - [`guardian`] - bus interceptor with PASS/FLAG/BLOCK verdicts
//! - [`search`] - pluggable web search backends
//! - [`gitops`] - workspace git operations
//! - [`config`] - configuration types and loading

pub mod brain;
pub mod brief;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod gitops;
pub mod guardian;
pub mod llm;
pub mod project;
pub mod search;
pub mod session;

pub use brain::{Brain, IncomingMessage, Intent, TurnOutcome};
pub use config::Config;
pub use guardian::{Guardian, Issue, Severity, Verdict};
pub use llm::{GenerationRequest, LlmApi, LlmClient, LlmError, LlmResponse};
pub use project::{Idea, Project, ProjectError, ProjectManager, Task};
pub use session::{DelegationResult, DelegationTask, Delegator, SessionManager};
