//! Deep LLM security review of builder output

use tracing::warn;

use super::patterns::{Issue, Severity};
use crate::llm::{GenerationRequest, LlmApi};

const SECURITY_REVIEW_PROMPT: &str = r#"Review this agent output for security issues. Be thorough but practical.

Agent: {from_agent}
Action: {action}
Output:
{output_text}

Check for:
1. Hardcoded secrets, API keys, tokens, passwords
2. SQL injection vulnerabilities (string formatting in queries)
3. Shell injection (unsanitized input in commands)
4. Path traversal (../ in file paths)
5. Excessive permissions or privilege escalation
6. Missing input validation
7. Unsafe dependencies or imports
8. Data exposure risks

Respond with ONLY a JSON object:
{
  "verdict": "pass|flag|block",
  "issues": [
    {
      "severity": "critical|high|medium|low|info",
      "category": "secret_leak|injection|permissions|vulnerability|best_practice",
      "description": "<what the issue is>",
      "location": "<where in the output>",
      "recommendation": "<how to fix>"
    }
  ],
  "blocked_reason": "<if verdict is block, explain why. null otherwise>"
}

Blocking policy:
- BLOCK only for: active secret exposure, code causing data loss, critical vulns with immediate exploit
- FLAG for: best practice violations, missing validation, suboptimal patterns
- PASS if no issues found"#;

/// Truncation bound for review prompts
const MAX_REVIEW_CHARS: usize = 8000;

/// Run the deep review. Failures return no issues - the fast scans already
/// ran and the review is additive.
pub async fn security_review(llm: &dyn LlmApi, from_agent: &str, action: &str, output_text: &str) -> Vec<Issue> {
    let mut output: String = output_text.chars().take(MAX_REVIEW_CHARS).collect();
    if output_text.chars().count() > MAX_REVIEW_CHARS {
        output.push_str("\n... (truncated)");
    }

    let prompt = SECURITY_REVIEW_PROMPT
        .replace("{from_agent}", from_agent)
        .replace("{action}", action)
        .replace("{output_text}", &output);

    let request = GenerationRequest::prompt(prompt)
        .with_system(
            "You are the Guardian agent. Review outputs for security issues. \
             You can PASS, FLAG, or BLOCK. Be thorough.",
        )
        .with_temperature(0.1)
        .with_agent("guardian");

    match llm.generate_json(request).await {
        Ok(value) => parse_issues(&value),
        Err(e) => {
            warn!(error = %e, "LLM security review failed");
            Vec::new()
        }
    }
}

/// Decode the review's issue list, tolerating sloppy model output.
pub fn parse_issues(value: &serde_json::Value) -> Vec<Issue> {
    value["issues"]
        .as_array()
        .map(|issues| {
            issues
                .iter()
                .map(|issue| Issue {
                    severity: Severity::parse(issue["severity"].as_str().unwrap_or("info")),
                    category: issue["category"].as_str().unwrap_or("best_practice").to_string(),
                    description: issue["description"].as_str().unwrap_or("").to_string(),
                    location: issue["location"].as_str().unwrap_or("").to_string(),
                    recommendation: issue["recommendation"].as_str().unwrap_or("").to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_issues() {
        let value = serde_json::json!({
            "verdict": "flag",
            "issues": [
                {"severity": "high", "category": "injection", "description": "shell injection",
                 "location": "deploy.sh", "recommendation": "quote arguments"},
                {"severity": "nonsense", "category": "best_practice", "description": "style"},
            ],
        });

        let issues = parse_issues(&value);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].category, "injection");
        // Unknown severity degrades to info
        assert_eq!(issues[1].severity, Severity::Info);
    }

    #[test]
    fn test_parse_issues_missing_array() {
        assert!(parse_issues(&serde_json::json!({"verdict": "pass"})).is_empty());
        assert!(parse_issues(&serde_json::json!("not an object")).is_empty());
    }
}
