//! Generating a structured project spec from an idea

use tracing::warn;

use crate::llm::{GenerationRequest, LlmApi};

const SPEC_PROMPT: &str = r#"Write a clear, structured project specification based on the user's idea.

User's idea: {idea}

{research_section}

Generate a SPEC.md in this exact format:

# Project: <name>

## Overview
<2-3 sentence summary of what this project does and why>

## Requirements
### Must Have
- <requirement 1>
- <requirement 2>

### Nice to Have
- <optional feature 1>

## Architecture Decisions
- <key decision 1 and rationale>

## Out of Scope
- <thing explicitly NOT included>

## Success Criteria
- [ ] <measurable criterion 1>

Rules:
- Be specific and actionable
- Keep requirements concise (one line each)
- Architecture decisions should explain WHY, not just WHAT
- Success criteria must be verifiable
- Stay practical - this is for a single developer with AI assistance"#;

/// Write a SPEC.md for the idea. LLM failure produces a minimal skeleton
/// rather than an error; project creation never stalls on spec writing.
pub async fn write_spec(llm: &dyn LlmApi, idea: &str, research_context: Option<&str>) -> String {
    let research_section = research_context
        .map(|r| format!("Research context:\n{r}"))
        .unwrap_or_default();

    let prompt = SPEC_PROMPT
        .replace("{idea}", idea)
        .replace("{research_section}", &research_section);

    let request = GenerationRequest::prompt(prompt)
        .with_system(
            "You are a technical specification writer. Write clear, actionable specs. \
             Output ONLY the markdown spec, no preamble.",
        )
        .with_temperature(0.4)
        .with_agent("brain");

    match llm.generate(request).await {
        Ok(response) => response.content,
        Err(e) => {
            warn!(error = %e, "Spec generation failed, using fallback skeleton");
            fallback_spec(idea)
        }
    }
}

fn fallback_spec(idea: &str) -> String {
    let title: String = idea.chars().take(60).collect();
    format!(
        "# Project: {title}\n\n\
         ## Overview\n{idea}\n\n\
         ## Requirements\n### Must Have\n- To be determined after further discussion\n\n\
         ## Architecture Decisions\n- To be determined\n\n\
         ## Out of Scope\n- To be determined\n\n\
         ## Success Criteria\n- [ ] Project builds and runs successfully\n- [ ] Core functionality works as described\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, LlmResponse};
    use async_trait::async_trait;

    struct FailingLlm;

    #[async_trait]
    impl LlmApi for FailingLlm {
        async fn generate(&self, _request: GenerationRequest) -> Result<LlmResponse, LlmError> {
            Err(LlmError::RateLimited {
                provider: "anthropic".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_fallback_spec_on_failure() {
        let spec = write_spec(&FailingLlm, "a TUI for todos", None).await;
        assert!(spec.starts_with("# Project: a TUI for todos"));
        assert!(spec.contains("## Success Criteria"));
    }

    #[test]
    fn test_fallback_truncates_title() {
        let long_idea = "x".repeat(200);
        let spec = fallback_spec(&long_idea);
        let title_line = spec.lines().next().unwrap();
        assert!(title_line.len() <= "# Project: ".len() + 60);
    }
}
