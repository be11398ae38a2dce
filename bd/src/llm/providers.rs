//! Provider registry, detection, and wire shapes
//!
//! Three request shapes cover every provider: the Anthropic Messages API,
//! the Google Gemini generateContent API, and the OpenAI-compatible
//! chat/completions API everyone else speaks.

use serde_json::json;

use super::error::LlmError;
use super::types::{GenerationRequest, LlmResponse};

/// Which request/response shape a provider speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireShape {
    Anthropic,
    Gemini,
    OpenAiCompat,
}

/// Static description of a provider
#[derive(Debug, Clone, Copy)]
pub struct ProviderInfo {
    pub name: &'static str,
    pub api_key_env: &'static str,
    /// Legacy env var honored when the primary is unset
    pub fallback_key_env: Option<&'static str>,
    pub base_url: &'static str,
    pub wire: WireShape,
}

pub const PROVIDERS: &[ProviderInfo] = &[
    ProviderInfo {
        name: "anthropic",
        api_key_env: "ANTHROPIC_API_KEY",
        fallback_key_env: None,
        base_url: "https://api.anthropic.com",
        wire: WireShape::Anthropic,
    },
    ProviderInfo {
        name: "deepseek",
        api_key_env: "DEEPSEEK_API_KEY",
        fallback_key_env: None,
        base_url: "https://api.deepseek.com/v1",
        wire: WireShape::OpenAiCompat,
    },
    ProviderInfo {
        name: "qwen",
        api_key_env: "QWEN_API_KEY",
        fallback_key_env: Some("DASHSCOPE_API_KEY"),
        base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1",
        wire: WireShape::OpenAiCompat,
    },
    ProviderInfo {
        name: "google",
        api_key_env: "GOOGLE_API_KEY",
        fallback_key_env: None,
        base_url: "https://generativelanguage.googleapis.com/v1beta",
        wire: WireShape::Gemini,
    },
    ProviderInfo {
        name: "kimi",
        api_key_env: "KIMI_API_KEY",
        fallback_key_env: Some("MOONSHOT_API_KEY"),
        base_url: "https://api.moonshot.cn/v1",
        wire: WireShape::OpenAiCompat,
    },
];

/// Choose a provider from a model name: substring heuristics, defaulting to
/// anthropic.
pub fn detect_provider(model: &str) -> &'static ProviderInfo {
    let lower = model.to_lowercase();
    let name = if lower.contains("claude") {
        "anthropic"
    } else if lower.contains("deepseek") {
        "deepseek"
    } else if lower.contains("qwen") {
        "qwen"
    } else if lower.contains("gemini") {
        "google"
    } else if lower.contains("kimi") || lower.contains("moonshot") {
        "kimi"
    } else {
        "anthropic"
    };

    PROVIDERS
        .iter()
        .find(|p| p.name == name)
        .expect("registry covers every detected name")
}

/// Read the provider's API key from its env var (or legacy fallback).
pub fn resolve_api_key(info: &ProviderInfo) -> Result<String, LlmError> {
    if let Ok(key) = std::env::var(info.api_key_env)
        && !key.is_empty()
    {
        return Ok(key);
    }
    if let Some(fallback) = info.fallback_key_env
        && let Ok(key) = std::env::var(fallback)
        && !key.is_empty()
    {
        return Ok(key);
    }
    Err(LlmError::MissingApiKey {
        provider: info.name.to_string(),
        env_var: info.api_key_env.to_string(),
    })
}

/// The URL and JSON body for a request, per wire shape.
pub fn build_request(
    info: &ProviderInfo,
    api_key: &str,
    model: &str,
    request: &GenerationRequest,
) -> (String, serde_json::Value) {
    match info.wire {
        WireShape::Anthropic => {
            let mut body = json!({
                "model": model,
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
                "messages": request.messages.iter().map(|m| json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })).collect::<Vec<_>>(),
            });
            if !request.system.is_empty() {
                body["system"] = json!(request.system);
            }
            (format!("{}/v1/messages", info.base_url), body)
        }
        WireShape::Gemini => {
            let mut body = json!({
                "contents": request.messages.iter().map(|m| json!({
                    "role": if m.role.as_str() == "assistant" { "model" } else { "user" },
                    "parts": [{"text": m.content}],
                })).collect::<Vec<_>>(),
                "generationConfig": {
                    "temperature": request.temperature,
                    "maxOutputTokens": request.max_tokens,
                },
            });
            if !request.system.is_empty() {
                body["systemInstruction"] = json!({"parts": [{"text": request.system}]});
            }
            (
                format!("{}/models/{}:generateContent?key={}", info.base_url, model, api_key),
                body,
            )
        }
        WireShape::OpenAiCompat => {
            let mut messages = Vec::new();
            if !request.system.is_empty() {
                messages.push(json!({"role": "system", "content": request.system}));
            }
            for m in &request.messages {
                messages.push(json!({"role": m.role.as_str(), "content": m.content}));
            }
            let body = json!({
                "model": model,
                "messages": messages,
                "temperature": request.temperature,
                "max_tokens": request.max_tokens,
            });
            (format!("{}/chat/completions", info.base_url), body)
        }
    }
}

/// Pull content and token usage out of a provider response body.
pub fn parse_response(
    info: &ProviderInfo,
    model: &str,
    body: &serde_json::Value,
) -> Result<LlmResponse, LlmError> {
    let invalid = |message: String| LlmError::InvalidResponse {
        provider: info.name.to_string(),
        message,
    };

    match info.wire {
        WireShape::Anthropic => {
            let content = body["content"]
                .as_array()
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter_map(|b| (b["type"] == "text").then(|| b["text"].as_str().unwrap_or("")))
                        .collect::<Vec<_>>()
                        .join("")
                })
                .ok_or_else(|| invalid("missing content blocks".to_string()))?;

            Ok(LlmResponse {
                content,
                model: body["model"].as_str().unwrap_or(model).to_string(),
                provider: info.name.to_string(),
                input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0),
                output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0),
            })
        }
        WireShape::Gemini => {
            let content = body["candidates"][0]["content"]["parts"]
                .as_array()
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| p["text"].as_str())
                        .collect::<Vec<_>>()
                        .join("")
                })
                .ok_or_else(|| invalid("missing candidate parts".to_string()))?;

            Ok(LlmResponse {
                content,
                model: model.to_string(),
                provider: info.name.to_string(),
                input_tokens: body["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0),
                output_tokens: body["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0),
            })
        }
        WireShape::OpenAiCompat => {
            let content = body["choices"][0]["message"]["content"]
                .as_str()
                .ok_or_else(|| invalid("missing choices[0].message.content".to_string()))?
                .to_string();

            Ok(LlmResponse {
                content,
                model: body["model"].as_str().unwrap_or(model).to_string(),
                provider: info.name.to_string(),
                input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
                output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;

    #[test]
    fn test_detect_provider_heuristics() {
        assert_eq!(detect_provider("claude-sonnet-4-20250514").name, "anthropic");
        assert_eq!(detect_provider("deepseek-chat").name, "deepseek");
        assert_eq!(detect_provider("qwen-plus").name, "qwen");
        assert_eq!(detect_provider("gemini-2.0-flash").name, "google");
        assert_eq!(detect_provider("kimi-k2").name, "kimi");
        assert_eq!(detect_provider("moonshot-v1-8k").name, "kimi");
        // Unknown models default to anthropic
        assert_eq!(detect_provider("mystery-model").name, "anthropic");
    }

    #[test]
    fn test_anthropic_request_shape() {
        let info = detect_provider("claude-sonnet-4-20250514");
        let request = GenerationRequest::prompt("hi").with_system("be brief");
        let (url, body) = build_request(info, "key", "claude-sonnet-4-20250514", &request);

        assert_eq!(url, "https://api.anthropic.com/v1/messages");
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_gemini_request_shape() {
        let info = detect_provider("gemini-2.0-flash");
        let request = GenerationRequest {
            system: "sys".to_string(),
            messages: vec![ChatMessage::user("q"), ChatMessage::assistant("a")],
            ..GenerationRequest::default()
        };
        let (url, body) = build_request(info, "secret", "gemini-2.0-flash", &request);

        assert!(url.contains(":generateContent?key=secret"));
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
    }

    #[test]
    fn test_openai_compat_prepends_system() {
        let info = detect_provider("deepseek-chat");
        let request = GenerationRequest::prompt("hi").with_system("sys");
        let (url, body) = build_request(info, "key", "deepseek-chat", &request);

        assert_eq!(url, "https://api.deepseek.com/v1/chat/completions");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn test_parse_anthropic_response() {
        let info = detect_provider("claude-sonnet-4-20250514");
        let body = serde_json::json!({
            "model": "claude-sonnet-4-20250514",
            "content": [{"type": "text", "text": "hello "}, {"type": "text", "text": "there"}],
            "usage": {"input_tokens": 12, "output_tokens": 4},
        });

        let response = parse_response(info, "claude-sonnet-4-20250514", &body).unwrap();
        assert_eq!(response.content, "hello there");
        assert_eq!(response.input_tokens, 12);
        assert_eq!(response.output_tokens, 4);
    }

    #[test]
    fn test_parse_openai_response() {
        let info = detect_provider("deepseek-chat");
        let body = serde_json::json!({
            "model": "deepseek-chat",
            "choices": [{"message": {"role": "assistant", "content": "hi"}}],
            "usage": {"prompt_tokens": 8, "completion_tokens": 2},
        });

        let response = parse_response(info, "deepseek-chat", &body).unwrap();
        assert_eq!(response.content, "hi");
        assert_eq!(response.provider, "deepseek");
        assert_eq!(response.input_tokens, 8);
    }

    #[test]
    fn test_parse_gemini_response() {
        let info = detect_provider("gemini-2.0-flash");
        let body = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "answer"}]}}],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 1},
        });

        let response = parse_response(info, "gemini-2.0-flash", &body).unwrap();
        assert_eq!(response.content, "answer");
        assert_eq!(response.provider, "google");
    }

    #[test]
    fn test_parse_malformed_response_errors() {
        let info = detect_provider("deepseek-chat");
        let body = serde_json::json!({"unexpected": true});
        assert!(parse_response(info, "deepseek-chat", &body).is_err());
    }
}
