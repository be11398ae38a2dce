//! Rewriting worker output in the orchestrator's voice

use std::collections::BTreeMap;
use tracing::warn;

use super::dag::SubtaskOutcome;
use crate::llm::{ChatMessage, GenerationRequest, LlmApi};

const SYNTHESIZE_PROMPT: &str = r#"You are synthesizing results from specialist agents into one coherent response for the user.

Original user request: {user_message}

Agent results:
{agent_results}

Rules:
1. Lead with the most important/requested information
2. If the verifier made corrections, incorporate them naturally (don't say "the verifier found...")
3. If confidence is low on any claim, note the uncertainty naturally
4. The user should NOT know about the multi-agent system - write as one unified voice
5. Be conversational, not robotic
6. If an agent failed, work around it gracefully - don't expose internal errors

Write your synthesized response:"#;

fn synthesis_request(user_message: &str, agent_results: &str, history: &[ChatMessage], system: &str) -> GenerationRequest {
    let prompt = SYNTHESIZE_PROMPT
        .replace("{user_message}", user_message)
        .replace("{agent_results}", agent_results);

    let mut messages = history.to_vec();
    messages.push(ChatMessage::user(prompt));

    GenerationRequest::default()
        .with_system(system)
        .with_messages(messages)
        .with_temperature(0.6)
        .with_agent("brain")
}

/// Pull a readable fallback out of a worker result.
fn fallback_content(result: &serde_json::Value) -> Option<String> {
    result["content"]
        .as_str()
        .or_else(|| result["notes"].as_str())
        .map(|s| s.to_string())
        .or_else(|| result.as_str().map(|s| s.to_string()))
}

/// Synthesize a single agent's result. Falls back to the raw content when
/// the synthesis call fails.
pub async fn synthesize_single(
    llm: &dyn LlmApi,
    user_message: &str,
    agent: &str,
    agent_result: &serde_json::Value,
    history: &[ChatMessage],
    system: &str,
) -> Result<String, String> {
    let rendered = serde_json::to_string_pretty(agent_result).unwrap_or_default();
    let block = format!("--- {agent} result ---\n{rendered}\n");

    match llm.generate(synthesis_request(user_message, &block, history, system)).await {
        Ok(response) => Ok(response.content),
        Err(e) => {
            warn!(error = %e, "Synthesis failed, falling back to raw content");
            fallback_content(agent_result).ok_or_else(|| e.to_string())
        }
    }
}

/// Synthesize a multi-agent result map. The fallback concatenates the
/// successful results' content.
pub async fn synthesize_multi(
    llm: &dyn LlmApi,
    user_message: &str,
    all_results: &BTreeMap<String, SubtaskOutcome>,
    history: &[ChatMessage],
    system: &str,
) -> String {
    let mut block = String::new();
    for (key, outcome) in all_results {
        let marker = if outcome.completed { "ok" } else { "FAILED" };
        let rendered = outcome
            .result
            .as_ref()
            .map(|r| serde_json::to_string_pretty(r).unwrap_or_default())
            .unwrap_or_else(|| format!("{{\"error\": \"{}\"}}", outcome.error.as_deref().unwrap_or("unknown")));
        block.push_str(&format!(
            "--- [{marker}] {key} ---\nDescription: {}\nResult:\n{rendered}\n\n",
            outcome.description
        ));
    }

    match llm.generate(synthesis_request(user_message, &block, history, system)).await {
        Ok(response) => response.content,
        Err(e) => {
            warn!(error = %e, "Multi-synthesis failed, concatenating results");
            let parts: Vec<String> = all_results
                .values()
                .filter(|o| o.completed)
                .filter_map(|o| o.result.as_ref().and_then(fallback_content))
                .collect();

            if parts.is_empty() {
                "I attempted to handle your request but ran into issues. Could you break it down or rephrase?"
                    .to_string()
            } else {
                parts.join("\n\n")
            }
        }
    }
}
