//! Bounded conversation ring

use crate::llm::ChatMessage;

/// Maximum turns kept in working memory
const MAX_HISTORY: usize = 50;

/// Messages preserved at the front for session anchoring
const ANCHOR: usize = 2;

/// Estimated characters per token
const CHARS_PER_TOKEN: usize = 4;

/// In-memory conversation history: a ring of 50 messages that always keeps
/// the first two for session anchoring.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
        self.trim();
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
        self.trim();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The last `n` messages.
    pub fn recent(&self, n: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// Last `n` turns formatted for prompt injection.
    pub fn recent_context(&self, turns: usize) -> String {
        let recent = self.recent(turns * 2);
        if recent.is_empty() {
            return "(no prior conversation)".to_string();
        }

        recent
            .iter()
            .map(|m| {
                let role = match m.role {
                    crate::llm::Role::User => "User",
                    crate::llm::Role::Assistant => "Assistant",
                };
                let content: String = m.content.chars().take(200).collect();
                format!("{role}: {content}")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Estimated token count at 4 chars per token.
    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self.messages.iter().map(|m| m.content.len()).sum();
        chars / CHARS_PER_TOKEN
    }

    /// Messages for a direct-reply prompt. When the estimate exceeds 85% of
    /// the ceiling, collapse to the first two plus the last five.
    pub fn for_prompt(&self, ceiling_tokens: usize) -> Vec<ChatMessage> {
        if self.estimated_tokens() * 100 > ceiling_tokens * 85 && self.messages.len() > ANCHOR + 5 {
            let mut kept: Vec<ChatMessage> = self.messages[..ANCHOR].to_vec();
            kept.extend_from_slice(self.recent(5));
            kept
        } else {
            self.recent(10).to_vec()
        }
    }

    fn trim(&mut self) {
        if self.messages.len() > MAX_HISTORY {
            let keep = MAX_HISTORY - ANCHOR;
            let tail_start = self.messages.len() - keep;
            let mut kept: Vec<ChatMessage> = self.messages[..ANCHOR].to_vec();
            kept.extend_from_slice(&self.messages[tail_start..]);
            self.messages = kept;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_preserves_anchor() {
        let mut history = ConversationHistory::new();
        for i in 0..60 {
            history.push_user(format!("message {i}"));
        }

        assert_eq!(history.len(), MAX_HISTORY);
        // The first two survive
        assert_eq!(history.recent(MAX_HISTORY)[0].content, "message 0");
        assert_eq!(history.recent(MAX_HISTORY)[1].content, "message 1");
        // The newest survives
        assert_eq!(history.recent(1)[0].content, "message 59");
    }

    #[test]
    fn test_recent_context_empty() {
        let history = ConversationHistory::new();
        assert_eq!(history.recent_context(3), "(no prior conversation)");
    }

    #[test]
    fn test_recent_context_formats_roles() {
        let mut history = ConversationHistory::new();
        history.push_user("hello");
        history.push_assistant("hi there");

        let context = history.recent_context(3);
        assert!(context.contains("User: hello"));
        assert!(context.contains("Assistant: hi there"));
    }

    #[test]
    fn test_context_guard_collapses() {
        let mut history = ConversationHistory::new();
        // ~100 tokens per message
        for i in 0..30 {
            history.push_user(format!("{i} {}", "x".repeat(400)));
        }

        // Generous ceiling: recent window
        assert_eq!(history.for_prompt(100_000).len(), 10);

        // Tight ceiling: anchor + last five
        let guarded = history.for_prompt(1000);
        assert_eq!(guarded.len(), 7);
        assert!(guarded[0].content.starts_with("0 "));
        assert!(guarded[1].content.starts_with("1 "));
        assert!(guarded[6].content.starts_with("29 "));
    }
}
