//! Intent classification

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::llm::{GenerationRequest, LlmApi};

/// The closed set of intents the classifier may produce. Unknown labels
/// degrade to SimpleChat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    #[default]
    SimpleChat,
    BuildRequest,
    FactualQuestion,
    ResearchRequest,
    IdeaSuggestion,
    ProjectRequest,
    ComplexTask,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::SimpleChat => "simple_chat",
            Intent::BuildRequest => "build_request",
            Intent::FactualQuestion => "factual_question",
            Intent::ResearchRequest => "research_request",
            Intent::IdeaSuggestion => "idea_suggestion",
            Intent::ProjectRequest => "project_request",
            Intent::ComplexTask => "complex_task",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "simple_chat" => Some(Intent::SimpleChat),
            "build_request" => Some(Intent::BuildRequest),
            "factual_question" => Some(Intent::FactualQuestion),
            "research_request" => Some(Intent::ResearchRequest),
            "idea_suggestion" => Some(Intent::IdeaSuggestion),
            "project_request" => Some(Intent::ProjectRequest),
            "complex_task" => Some(Intent::ComplexTask),
            _ => None,
        }
    }
}

/// One subtask from a complex-task decomposition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub agent: String,
    pub action: String,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

/// Classifier output
#[derive(Debug, Clone)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f64,
    pub subtasks: Vec<Subtask>,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            intent: Intent::SimpleChat,
            confidence: 0.3,
            subtasks: Vec::new(),
        }
    }
}

const CLASSIFY_PROMPT: &str = r#"Classify the user's intent into exactly one category. Respond with ONLY a JSON object.

Categories:
- "simple_chat": Greetings, casual talk, opinions, simple questions answerable from general knowledge. No specialist needed.
- "build_request": Code generation, file creation/editing, tool execution, automation, debugging, anything that produces artifacts.
- "factual_question": Specific factual claims to verify, "is this true?", data lookups, corrections.
- "research_request": Open-ended investigation, comparisons, "find out about...", market research, multi-source synthesis.
- "idea_suggestion": The user floats an idea to remember for later without committing to build it now.
- "project_request": The user wants to start, continue, or manage a structured multi-feature project.
- "complex_task": Requires MULTIPLE specialists in one turn. e.g. "Research X and then build Y based on findings."

For "complex_task", also provide a decomposition into ordered subtasks.

User message:
{user_message}

Recent conversation context (last 3 turns):
{recent_context}

Respond with ONLY this JSON:
{
  "intent": "<category>",
  "confidence": <0.0-1.0>,
  "reasoning": "<one sentence>",
  "subtasks": [
    {
      "agent": "builder|verifier|researcher",
      "action": "<verb phrase>",
      "description": "<what this subtask accomplishes>",
      "depends_on": [<indices of subtasks this depends on, empty if independent>]
    }
  ]
}

The "subtasks" array should be empty for all intents except "complex_task"."#;

/// Classify a user message. Never fails: classification errors and unknown
/// labels fall back to simple chat.
pub async fn classify(llm: &dyn LlmApi, user_message: &str, recent_context: &str) -> Classification {
    let prompt = CLASSIFY_PROMPT
        .replace("{user_message}", user_message)
        .replace("{recent_context}", recent_context);

    let request = GenerationRequest::prompt(prompt)
        .with_system("You are an intent classifier. Respond with ONLY valid JSON. No explanations, no markdown.")
        .with_temperature(0.2)
        .with_agent("brain");

    let value = match llm.generate_json(request).await {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Classification failed, defaulting to simple_chat");
            return Classification::default();
        }
    };

    parse_classification(&value)
}

/// Decode a classification, degrading unknown intents and ignoring subtasks
/// on non-complex intents.
pub fn parse_classification(value: &serde_json::Value) -> Classification {
    let raw_intent = value["intent"].as_str().unwrap_or("");
    let intent = match Intent::parse(raw_intent) {
        Some(intent) => intent,
        None => {
            warn!(intent = raw_intent, "Unknown intent, defaulting to simple_chat");
            Intent::SimpleChat
        }
    };

    // The model sometimes emits subtasks for non-complex intents; only
    // complex_task honors them
    let subtasks = if intent == Intent::ComplexTask {
        value["subtasks"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    Classification {
        intent,
        confidence: value["confidence"].as_f64().unwrap_or(0.5),
        subtasks,
    }
}
