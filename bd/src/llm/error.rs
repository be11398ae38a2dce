//! LLM error types

use std::time::Duration;
use thiserror::Error;

/// Errors from LLM calls. Always carries the provider so callers can report
/// which backend misbehaved; these are returned, never panicked.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("[{provider}] API key missing: {env_var} not set")]
    MissingApiKey { provider: String, env_var: String },

    #[error("[{provider}] API error {status}: {message}")]
    ApiError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("[{provider}] rate limited")]
    RateLimited { provider: String },

    #[error("[{provider}] network error: {source}")]
    Network {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("[{provider}] timeout after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("[{provider}] invalid response: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("[{provider}] expected JSON, got: {snippet}")]
    InvalidJson { provider: String, snippet: String },
}

impl LlmError {
    pub fn provider(&self) -> &str {
        match self {
            LlmError::MissingApiKey { provider, .. }
            | LlmError::ApiError { provider, .. }
            | LlmError::RateLimited { provider }
            | LlmError::Network { provider, .. }
            | LlmError::Timeout { provider, .. }
            | LlmError::InvalidResponse { provider, .. }
            | LlmError::InvalidJson { provider, .. } => provider,
        }
    }

    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status >= 500,
            LlmError::Network { .. } => true,
            LlmError::Timeout { .. } => true,
            LlmError::MissingApiKey { .. } | LlmError::InvalidResponse { .. } | LlmError::InvalidJson { .. } => false,
        }
    }
}
