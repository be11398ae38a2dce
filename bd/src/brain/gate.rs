//! Memory gating: deciding what a turn leaves behind

use tracing::{info, warn};

use memstore::{MemoryEngine, Turn};

use crate::llm::{GenerationRequest, LlmApi};

/// Facts below this confidence don't enter the knowledge cache
const FACT_CONFIDENCE_FLOOR: f64 = 0.75;

const MEMORY_DECISION_PROMPT: &str = r#"Decide what (if anything) from this interaction should be stored in memory.

User message: {user_message}
Assistant response summary: {response_summary}

For each item worth remembering, classify it:

Respond with ONLY this JSON:
{
  "memories": [
    {
      "text": "<concise text to remember>",
      "importance": <0.0-1.0>,
      "signals": {
        "user_explicit": false,
        "decision": false,
        "error_correction": false,
        "preference": false,
        "repeated": false
      },
      "tags": ["<category>"]
    }
  ],
  "facts_for_cache": [
    {
      "fact": "<verified factual statement>",
      "category": "<technical|financial|general|personal_preference>",
      "confidence": <0.0-1.0>
    }
  ]
}

Rules:
- Only store what's worth retrieving later
- User preferences and corrections are HIGH importance
- Casual greetings and small talk: store NOTHING
- Sensitive info (passwords, keys, financial details): NEVER store
- Be concise - memories should be searchable fragments, not essays
- If nothing worth storing, return empty arrays"#;

/// Run the memory gate for one turn. Best-effort: every failure is logged
/// and swallowed. Returns (memories stored, facts stored).
pub async fn gate_memory(
    llm: &dyn LlmApi,
    engine: &MemoryEngine,
    user_message: &str,
    response_text: &str,
) -> (usize, usize) {
    let summary: String = response_text.chars().take(500).collect();
    let prompt = MEMORY_DECISION_PROMPT
        .replace("{user_message}", user_message)
        .replace("{response_summary}", &summary);

    let request = GenerationRequest::prompt(prompt)
        .with_system("You are a memory gating system. Decide what's worth remembering. Respond with ONLY valid JSON.")
        .with_temperature(0.2)
        .with_agent("brain");

    let decision = match llm.generate_json(request).await {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Memory gating LLM call failed (non-fatal)");
            return (0, 0);
        }
    };

    let mut memories_stored = 0usize;
    let empty = Vec::new();
    let memories = decision["memories"].as_array().unwrap_or(&empty);

    let texts: Vec<&str> = memories.iter().filter_map(|m| m["text"].as_str()).filter(|t| !t.is_empty()).collect();
    if !texts.is_empty() {
        // Fold the gate's picks into one ingestable turn, unioning signals
        // and tags across entries
        let mut signals: Vec<String> = Vec::new();
        let mut tags: Vec<String> = Vec::new();
        for memory in memories {
            if let Some(sig) = memory["signals"].as_object() {
                for (name, on) in sig {
                    if on.as_bool().unwrap_or(false) && !signals.contains(name) {
                        signals.push(name.clone());
                    }
                }
            }
            if let Some(memory_tags) = memory["tags"].as_array() {
                for tag in memory_tags.iter().filter_map(|t| t.as_str()) {
                    if !tags.contains(&tag.to_string()) {
                        tags.push(tag.to_string());
                    }
                }
            }
        }

        let turn = Turn::new(user_message, texts.join("\n"), "brain")
            .with_tags(tags)
            .with_signals(signals);

        match engine.ingest(&turn) {
            Ok(ids) => memories_stored = ids.len(),
            Err(e) => warn!(error = %e, "Memory ingest failed (non-fatal)"),
        }
    }

    let mut facts_stored = 0usize;
    if let Some(facts) = decision["facts_for_cache"].as_array() {
        for entry in facts {
            let Some(fact) = entry["fact"].as_str().filter(|f| !f.is_empty()) else {
                continue;
            };
            let confidence = entry["confidence"].as_f64().unwrap_or(0.8);
            if confidence < FACT_CONFIDENCE_FLOOR {
                continue;
            }
            match engine.store_fact(fact, "brain", confidence) {
                Ok(_) => facts_stored += 1,
                Err(e) => warn!(error = %e, "Fact store failed (non-fatal)"),
            }
        }
    }

    if memories_stored > 0 || facts_stored > 0 {
        info!(memories = memories_stored, facts = facts_stored, "Memory gating stored");
        let _ = engine.store().log_activity(
            "memory_store",
            "brain",
            &format!("{memories_stored} memories, {facts_stored} facts"),
        );
    }
    (memories_stored, facts_stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, LlmResponse};
    use async_trait::async_trait;
    use memstore::MemoryStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct MockLlm(String);

    #[async_trait]
    impl LlmApi for MockLlm {
        async fn generate(&self, _request: GenerationRequest) -> Result<LlmResponse, LlmError> {
            if self.0.is_empty() {
                Err(LlmError::Timeout {
                    provider: "anthropic".to_string(),
                    after: std::time::Duration::from_secs(60),
                })
            } else {
                Ok(LlmResponse {
                    content: self.0.clone(),
                    ..LlmResponse::default()
                })
            }
        }
    }

    fn engine(temp: &TempDir) -> MemoryEngine {
        let store = Arc::new(MemoryStore::open(temp.path().join("memory.db")).unwrap());
        MemoryEngine::new(store, None)
    }

    #[tokio::test]
    async fn test_gate_stores_memories_and_facts() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);
        let llm = MockLlm(
            r#"{
                "memories": [{"text": "user prefers rust", "importance": 0.8,
                              "signals": {"preference": true}, "tags": ["preference"]}],
                "facts_for_cache": [
                    {"fact": "rust 1.0 shipped in 2015", "category": "technical", "confidence": 0.9},
                    {"fact": "dubious claim", "category": "general", "confidence": 0.4}
                ]
            }"#
            .to_string(),
        );

        let (memories, facts) = gate_memory(&llm, &engine, "I prefer rust", "noted").await;
        assert!(memories >= 1);
        // The low-confidence fact was dropped
        assert_eq!(facts, 1);
        assert_eq!(engine.store().list_facts().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gate_empty_decision_stores_nothing() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);
        let llm = MockLlm(r#"{"memories": [], "facts_for_cache": []}"#.to_string());

        let (memories, facts) = gate_memory(&llm, &engine, "hello", "hi!").await;
        assert_eq!((memories, facts), (0, 0));
        assert_eq!(engine.store().count_memories().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_gate_failure_is_swallowed() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);
        let llm = MockLlm(String::new());

        let (memories, facts) = gate_memory(&llm, &engine, "hello", "hi!").await;
        assert_eq!((memories, facts), (0, 0));
    }
}
