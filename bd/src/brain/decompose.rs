//! Breaking a project spec into features and assignable tasks

use tracing::warn;

use crate::llm::{GenerationRequest, LlmApi};
use crate::project::{Feature, Task};

const DECOMPOSE_PROMPT: &str = r#"Break this project specification into features, each with ordered tasks for a multi-agent system.

Available agents:
- builder: Code generation, file creation, execution, debugging. NO internet access.
- researcher: Research, web search, information gathering. Has internet.
- verifier: Fact-checking, code review, testing. Has internet.
- guardian: Security review, credential checks, risk assessment.

Project Spec:
{spec}

Rules:
- Group related tasks under a feature (2-5 features for most projects)
- Order tasks logically (design before implementation, implementation before testing)
- Each task should be completable independently once its dependencies are met
- Assign the most appropriate agent to each task
- Use task ids like "task_1", "task_2" for dependencies
- Keep tasks focused - one clear deliverable per task
- Include a verification/testing task at the end

Respond with ONLY this JSON:
{
  "features": [
    {
      "title": "<feature title>",
      "description": "<what this feature covers>",
      "tasks": [
        {
          "id": "task_1",
          "title": "<short task title>",
          "description": "<detailed description with enough context to execute>",
          "agent": "builder|researcher|verifier|guardian",
          "depends_on": [],
          "order": 1
        }
      ]
    }
  ]
}"#;

/// A decomposed feature with its tasks, ready for storage
#[derive(Debug, Clone)]
pub struct DecomposedFeature {
    pub feature: Feature,
    pub tasks: Vec<Task>,
}

/// Decompose a spec into features and tasks. Falls back to a minimal
/// build-then-verify plan when the model fails.
pub async fn decompose_spec(llm: &dyn LlmApi, project_id: &str, spec: &str) -> Vec<DecomposedFeature> {
    let prompt = DECOMPOSE_PROMPT.replace("{spec}", spec);
    let request = GenerationRequest::prompt(prompt)
        .with_system(
            "You are a task decomposition engine. Break projects into clear, ordered tasks. \
             Respond with ONLY valid JSON.",
        )
        .with_temperature(0.3)
        .with_agent("brain");

    let value = match llm.generate_json(request).await {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Task decomposition failed, using fallback plan");
            return fallback_plan(project_id);
        }
    };

    let parsed = parse_decomposition(project_id, &value);
    if parsed.is_empty() { fallback_plan(project_id) } else { parsed }
}

/// Decode the decomposition. Model-supplied task ids ("task_1") are kept as
/// row ids so depends_on references stay valid.
pub fn parse_decomposition(project_id: &str, value: &serde_json::Value) -> Vec<DecomposedFeature> {
    let Some(raw_features) = value["features"].as_array() else {
        return Vec::new();
    };

    let mut features = Vec::new();
    let mut global_order = 0i64;

    for (feature_idx, raw_feature) in raw_features.iter().enumerate() {
        let title = raw_feature["title"].as_str().unwrap_or("Untitled feature");
        let description = raw_feature["description"].as_str().unwrap_or("");
        let feature = Feature::new(project_id, title, description, feature_idx as i64 + 1);

        let mut tasks = Vec::new();
        if let Some(raw_tasks) = raw_feature["tasks"].as_array() {
            for raw_task in raw_tasks {
                global_order += 1;
                let mut task = Task::new(
                    project_id,
                    raw_task["title"].as_str().unwrap_or("Untitled task"),
                    raw_task["agent"].as_str().unwrap_or("builder"),
                    raw_task["order"].as_i64().unwrap_or(global_order),
                );
                if let Some(id) = raw_task["id"].as_str() {
                    task.id = id.to_string();
                }
                task.feature_id = feature.id.clone();
                task.description = raw_task["description"].as_str().unwrap_or("").to_string();
                task.depends_on = raw_task["depends_on"]
                    .as_array()
                    .map(|deps| deps.iter().filter_map(|d| d.as_str().map(|s| s.to_string())).collect())
                    .unwrap_or_default();
                tasks.push(task);
            }
        }

        if !tasks.is_empty() {
            features.push(DecomposedFeature { feature, tasks });
        }
    }

    features
}

/// Minimal plan: one feature with a build task and a dependent verify task.
fn fallback_plan(project_id: &str) -> Vec<DecomposedFeature> {
    let feature = Feature::new(project_id, "Implementation", "Build and verify the project", 1);

    let mut build = Task::new(project_id, "Implement project", "builder", 1);
    build.feature_id = feature.id.clone();
    build.description = "Build the project based on the specification.".to_string();

    let mut verify = Task::new(project_id, "Verify and test", "verifier", 2);
    verify.feature_id = feature.id.clone();
    verify.description = "Test the implementation and verify it meets the spec.".to_string();
    verify.depends_on = vec![build.id.clone()];

    vec![DecomposedFeature {
        feature,
        tasks: vec![build, verify],
    }]
}
