//! Child-process delegation to worker sessions

mod config;
mod manager;

pub use config::{AgentConfig, default_tools, timeout_for};
pub use manager::{DelegationResult, DelegationTask, Delegator, SessionManager};
