//! LLM client module
//!
//! Unified interface over several HTTP providers with a retry policy,
//! JSON-mode extraction, and per-call usage accounting.

mod client;
mod error;
mod providers;
mod types;
pub mod usage;

pub use client::{LlmApi, LlmClient, extract_json};
pub use error::LlmError;
pub use providers::{ProviderInfo, WireShape, detect_provider};
pub use types::{ChatMessage, GenerationRequest, LlmResponse, Role};
pub use usage::{UsageTracker, init_usage_tracker, usage_tracker};
