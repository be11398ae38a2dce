//! Multi-provider LLM client with retry policy and usage accounting

use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use memstore::UsageRecord;

use super::error::LlmError;
use super::providers::{ProviderInfo, WireShape, build_request, detect_provider, parse_response, resolve_api_key};
use super::types::{GenerationRequest, LlmResponse};
use super::usage::usage_tracker;
use crate::config::LlmConfig;

/// Normal per-call deadline
const DEADLINE: Duration = Duration::from_secs(60);

/// Deadline for code-generation calls
const DEADLINE_CODE: Duration = Duration::from_secs(180);

/// 429 backoff schedule
const RATE_LIMIT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];

/// Pause before the single 5xx retry
const SERVER_ERROR_BACKOFF: Duration = Duration::from_secs(3);

/// Seam for everything that talks to a model. The brain and guardian depend
/// on this trait so tests can script responses.
#[async_trait]
pub trait LlmApi: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<LlmResponse, LlmError>;

    /// Generate and parse the content as JSON, with fenced-block and
    /// brace-substring fallbacks.
    async fn generate_json(&self, request: GenerationRequest) -> Result<serde_json::Value, LlmError> {
        let response = self.generate(request).await?;
        extract_json(&response.content).ok_or_else(|| LlmError::InvalidJson {
            provider: response.provider.clone(),
            snippet: response.content.chars().take(200).collect(),
        })
    }
}

/// HTTP client dispatching to whichever provider the model name selects.
pub struct LlmClient {
    http: Client,
    default_model: String,
    max_tokens_cap: u32,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: Client::new(),
            default_model: config.default_model.clone(),
            max_tokens_cap: config.max_tokens,
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// One HTTP attempt under a deadline. Classifies the failure modes the
    /// retry policy branches on.
    async fn single_call(
        &self,
        info: &ProviderInfo,
        api_key: &str,
        model: &str,
        request: &GenerationRequest,
        deadline: Duration,
    ) -> Result<LlmResponse, LlmError> {
        let (url, body) = build_request(info, api_key, model, request);

        let mut http_request = self.http.post(&url).timeout(deadline).json(&body);
        match info.wire {
            WireShape::Anthropic => {
                http_request = http_request
                    .header("x-api-key", api_key)
                    .header("anthropic-version", "2023-06-01");
            }
            WireShape::OpenAiCompat => {
                http_request = http_request.header("Authorization", format!("Bearer {api_key}"));
            }
            // Gemini carries the key as a query parameter
            WireShape::Gemini => {}
        }

        let response = http_request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    provider: info.name.to_string(),
                    after: deadline,
                }
            } else {
                LlmError::Network {
                    provider: info.name.to_string(),
                    source: e,
                }
            }
        })?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(LlmError::RateLimited {
                provider: info.name.to_string(),
            });
        }
        if status == 401 {
            return Err(LlmError::ApiError {
                provider: info.name.to_string(),
                status,
                message: "invalid API key".to_string(),
            });
        }
        if !(200..300).contains(&status) {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                provider: info.name.to_string(),
                status,
                message,
            });
        }

        let body: serde_json::Value = response.json().await.map_err(|e| LlmError::Network {
            provider: info.name.to_string(),
            source: e,
        })?;
        parse_response(info, model, &body)
    }

    /// The resilience policy: timeout retries once at a doubled deadline,
    /// 429 retries on the 2/4/8s ladder, 5xx retries once after 3s, 401 and
    /// everything else short-circuits.
    async fn call_with_policy(
        &self,
        info: &ProviderInfo,
        api_key: &str,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<LlmResponse, LlmError> {
        let mut deadline = if request.is_code { DEADLINE_CODE } else { DEADLINE };
        let mut timeout_retried = false;
        let mut server_retried = false;
        let mut rate_retries = 0usize;

        loop {
            match self.single_call(info, api_key, model, request, deadline).await {
                Ok(response) => return Ok(response),
                Err(LlmError::Timeout { .. }) if !timeout_retried => {
                    warn!(provider = info.name, ?deadline, "Deadline exceeded, retrying with doubled deadline");
                    timeout_retried = true;
                    deadline *= 2;
                }
                Err(LlmError::RateLimited { .. }) if rate_retries < RATE_LIMIT_BACKOFF.len() => {
                    let backoff = RATE_LIMIT_BACKOFF[rate_retries];
                    warn!(provider = info.name, ?backoff, "Rate limited, backing off");
                    tokio::time::sleep(backoff).await;
                    rate_retries += 1;
                }
                Err(LlmError::ApiError { status, .. }) if status >= 500 && !server_retried => {
                    warn!(provider = info.name, status, "Server error, retrying once");
                    tokio::time::sleep(SERVER_ERROR_BACKOFF).await;
                    server_retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl LlmApi for LlmClient {
    async fn generate(&self, mut request: GenerationRequest) -> Result<LlmResponse, LlmError> {
        request.max_tokens = request.max_tokens.min(self.max_tokens_cap);
        let model = request.model.clone().unwrap_or_else(|| self.default_model.clone());
        let info = detect_provider(&model);

        let started = Instant::now();
        let result = match resolve_api_key(info) {
            Ok(api_key) => self.call_with_policy(info, &api_key, &model, &request).await,
            Err(e) => Err(e),
        };
        let duration_ms = started.elapsed().as_millis() as i64;

        // Every call logs a usage row, success or failure
        let record = match &result {
            Ok(response) => UsageRecord {
                agent: request.agent.clone(),
                model: model.clone(),
                provider: info.name.to_string(),
                input_tokens: response.input_tokens as i64,
                output_tokens: response.output_tokens as i64,
                duration_ms,
                success: true,
                error: None,
            },
            Err(e) => UsageRecord {
                agent: request.agent.clone(),
                model: model.clone(),
                provider: info.name.to_string(),
                input_tokens: 0,
                output_tokens: 0,
                duration_ms,
                success: false,
                error: Some(e.to_string()),
            },
        };
        usage_tracker().record(record);

        debug!(
            model,
            provider = info.name,
            success = result.is_ok(),
            duration_ms,
            "LLM call finished"
        );
        result
    }
}

/// Parse model output as JSON: the whole string, then the first fenced
/// ```json block, then the first-to-last brace substring.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    // Fenced block
    if let Some(open) = trimmed.find("```") {
        let after_fence = &trimmed[open + 3..];
        let content_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        if let Some(close) = after_fence[content_start..].find("```") {
            let inner = after_fence[content_start..content_start + close].trim();
            if let Ok(value) = serde_json::from_str(inner) {
                return Some(value);
            }
        }
    }

    // First { ... last }
    if let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}'))
        && open < close
        && let Ok(value) = serde_json::from_str(&trimmed[open..=close])
    {
        return Some(value);
    }

    None
}
