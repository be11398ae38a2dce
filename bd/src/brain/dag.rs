//! Layered execution of subtask graphs

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{info, warn};

use super::classify::Subtask;
use crate::llm::extract_json;
use crate::session::{DelegationTask, Delegator};

/// Fallback timeout for a whole layer's delegations
const LAYER_TIMEOUT: Duration = Duration::from_secs(180);

/// Outcome of one subtask, keyed "<agent>_<action>" in the merged map
#[derive(Debug, Clone)]
pub struct SubtaskOutcome {
    pub agent: String,
    pub action: String,
    pub description: String,
    pub completed: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Assign each subtask to a layer: 0 with no dependencies, otherwise one
/// past its deepest dependency. A cycle pins the cycle-closing task to
/// layer 0 with a warning; every task lands in some layer.
pub fn build_execution_layers(subtasks: &[Subtask]) -> Vec<Vec<usize>> {
    if subtasks.is_empty() {
        return Vec::new();
    }

    let n = subtasks.len();
    let mut assigned: Vec<Option<usize>> = vec![None; n];

    fn assign(
        idx: usize,
        subtasks: &[Subtask],
        assigned: &mut Vec<Option<usize>>,
        visiting: &mut HashSet<usize>,
    ) -> usize {
        if let Some(layer) = assigned[idx] {
            return layer;
        }
        if !visiting.insert(idx) {
            warn!(subtask = idx, "Circular dependency, pinning to layer 0");
            return 0;
        }

        let deps: Vec<usize> = subtasks[idx]
            .depends_on
            .iter()
            .copied()
            .filter(|&d| d < subtasks.len())
            .collect();

        let layer = if deps.is_empty() {
            0
        } else {
            1 + deps
                .iter()
                .map(|&d| assign(d, subtasks, assigned, visiting))
                .max()
                .unwrap_or(0)
        };

        visiting.remove(&idx);
        assigned[idx] = Some(layer);
        layer
    }

    for i in 0..n {
        let mut visiting = HashSet::new();
        assign(i, subtasks, &mut assigned, &mut visiting);
    }

    let max_layer = assigned.iter().map(|l| l.unwrap_or(0)).max().unwrap_or(0);
    let mut layers: Vec<Vec<usize>> = vec![Vec::new(); max_layer + 1];
    for (idx, layer) in assigned.iter().enumerate() {
        layers[layer.unwrap_or(0)].push(idx);
    }
    layers.retain(|l| !l.is_empty());
    layers
}

/// Execute a subtask graph: layers sequentially, tasks within a layer in
/// parallel. Prior layers' outputs ride along as `prior_results`. Failures
/// are partial; every subtask produces an outcome.
pub async fn execute_dag(
    delegator: &dyn Delegator,
    subtasks: &[Subtask],
    user_message: &str,
) -> BTreeMap<String, SubtaskOutcome> {
    let layers = build_execution_layers(subtasks);
    let mut all_results: BTreeMap<String, SubtaskOutcome> = BTreeMap::new();

    for (layer_idx, layer) in layers.iter().enumerate() {
        info!(
            layer = layer_idx + 1,
            of = layers.len(),
            tasks = layer.len(),
            "Executing DAG layer"
        );

        let prior: serde_json::Value = all_results
            .iter()
            .map(|(key, outcome)| (key.clone(), outcome.result.clone().unwrap_or(serde_json::Value::Null)))
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into();

        let tasks: Vec<DelegationTask> = layer
            .iter()
            .map(|&idx| {
                let subtask = &subtasks[idx];
                let mut context = serde_json::json!({
                    "scope": subtask.agent,
                    "action": subtask.action,
                });
                if !all_results.is_empty() {
                    context["prior_results"] = prior.clone();
                }
                DelegationTask::new(
                    subtask.agent.clone(),
                    format!("{}\n\nOriginal request: {user_message}", subtask.description),
                    context,
                )
            })
            .collect();

        let replies = delegator.delegate_parallel(tasks, LAYER_TIMEOUT).await;

        for (&idx, reply) in layer.iter().zip(replies.iter()) {
            let subtask = &subtasks[idx];
            let key = format!("{}_{}", subtask.agent, subtask.action);

            let result = if reply.result.is_empty() {
                None
            } else {
                // Worker output is JSON when it can be, raw text otherwise
                Some(
                    extract_json(&reply.result)
                        .unwrap_or_else(|| serde_json::json!({"content": reply.result})),
                )
            };

            all_results.insert(
                key,
                SubtaskOutcome {
                    agent: subtask.agent.clone(),
                    action: subtask.action.clone(),
                    description: subtask.description.clone(),
                    completed: reply.success,
                    result,
                    error: reply.error.clone(),
                },
            );
        }
    }

    all_results
}
