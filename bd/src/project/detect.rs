//! Keyword heuristics for project, idea, and backlog intents

const PROJECT_TRIGGERS: &[&str] = &[
    "i want to build",
    "let's create",
    "let's build",
    "can you make",
    "can you build",
    "build me",
    "create a",
    "develop a",
    "i need an app",
    "i need a tool",
    "i need a system",
    "make me a",
    "help me build",
    "let's make",
    "start a project",
    "new project",
    "build this now",
    "start project",
];

const IDEA_TRIGGERS: &[&str] = &[
    "we should build",
    "idea:",
    "what if we",
    "maybe we could",
    "how about we build",
    "wouldn't it be cool",
    "i've been thinking about",
    "here's an idea",
];

const BACKLOG_TRIGGERS: &[&str] = &[
    "what's in my backlog",
    "show ideas",
    "show backlog",
    "list ideas",
    "what ideas do i have",
    "my ideas",
    "idea backlog",
];

const MULTI_STEP_INDICATORS: &[&str] = &[
    "with", "that has", "including", "and also", "step 1", "first", "then", "finally", "multiple", "features",
    "components",
];

/// Does this message look like a committed project request? Requires a
/// trigger phrase plus either multi-step language or enough length to
/// suggest real scope.
pub fn detect_project(message: &str) -> bool {
    let lower = message.to_lowercase();
    let lower = lower.trim();
    if !PROJECT_TRIGGERS.iter().any(|t| lower.contains(t)) {
        return false;
    }
    let complexity = MULTI_STEP_INDICATORS.iter().filter(|i| lower.contains(*i)).count();
    complexity >= 1 || lower.len() > 80
}

/// Does this message float an idea rather than commit to building it?
pub fn detect_idea(message: &str) -> bool {
    let lower = message.to_lowercase();
    let lower = lower.trim();
    IDEA_TRIGGERS.iter().any(|t| lower.contains(t))
}

/// Is the user asking to see the idea backlog?
pub fn detect_backlog_query(message: &str) -> bool {
    let lower = message.to_lowercase();
    let lower = lower.trim();
    BACKLOG_TRIGGERS.iter().any(|t| lower.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_project_needs_complexity() {
        assert!(detect_project("I want to build a todo app with auth and sync"));
        assert!(detect_project(
            "can you build something that tracks my reading list and reminds me about unfinished books please"
        ));
        // Trigger without complexity or length
        assert!(!detect_project("create a file"));
        // No trigger at all
        assert!(!detect_project("what's the weather like"));
    }

    #[test]
    fn test_detect_idea() {
        assert!(detect_idea("we should build a TUI for todos"));
        assert!(detect_idea("idea: a bot that summarizes my inbox"));
        assert!(detect_idea("What if we made the cache distributed?"));
        assert!(!detect_idea("build me a cache with eviction"));
    }

    #[test]
    fn test_detect_backlog_query() {
        assert!(detect_backlog_query("show ideas"));
        assert!(detect_backlog_query("What's in my backlog?"));
        assert!(!detect_backlog_query("tell me a joke"));
    }
}
