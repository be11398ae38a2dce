//! Request and response types for the LLM client

use serde::{Deserialize, Serialize};

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A generation request. The model choice selects the provider; `agent`
/// attributes the call in the usage log.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    /// None uses the client's default model
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Code-generation calls get the longer 180s deadline
    pub is_code: bool,
    pub agent: String,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            system: String::new(),
            messages: Vec::new(),
            model: None,
            temperature: 0.7,
            max_tokens: 4096,
            is_code: false,
            agent: "brain".to_string(),
        }
    }
}

impl GenerationRequest {
    /// Single-user-message request
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(prompt)],
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn code(mut self) -> Self {
        self.is_code = true;
        self
    }
}

/// A successful generation
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_builder() {
        let req = GenerationRequest::prompt("hello")
            .with_system("be brief")
            .with_temperature(0.2)
            .with_agent("guardian");

        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
        assert_eq!(req.system, "be brief");
        assert_eq!(req.agent, "guardian");
        assert!(!req.is_code);
        assert!(req.code().is_code);
    }
}
