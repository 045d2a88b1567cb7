use crate::types::{AgentDescriptor, AgentType, Task};
use quorum_core::Payload;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// How the steps of one task's plan relate to each other.
///
/// Only `Sequential` is executed; the others are accepted in configuration
/// and fall back to sequential execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationPattern {
    #[default]
    Sequential,
    Parallel,
    Pipeline,
    Consensus,
}

/// One agent invocation within a task.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub index: usize,
    pub agent_id: String,
    pub agent_type: AgentType,
    /// Task input plus task/agent context. `shared_context` is added at run time.
    pub inputs: Payload,
    pub expected_outputs: Vec<String>,
    pub timeout: Duration,
}

impl PlanStep {
    /// Inputs for invocation, with the results of earlier steps of the same task.
    pub fn inputs_with_shared(&self, shared: &Payload) -> Payload {
        let mut inputs = self.inputs.clone();
        inputs.insert("shared_context".into(), Value::Object(shared.clone()));
        inputs
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub task_id: Uuid,
    pub pattern: CoordinationPattern,
    pub steps: Vec<PlanStep>,
}

/// Output tags of capabilities whose input tags intersect the task's input keys.
pub fn expected_outputs(agent: &AgentDescriptor, input: &Payload) -> Vec<String> {
    let mut outputs: Vec<String> = Vec::new();
    for capability in &agent.capabilities {
        if capability.accepts_any(input.keys()) {
            for tag in &capability.output_types {
                if !outputs.contains(tag) {
                    outputs.push(tag.clone());
                }
            }
        }
    }
    outputs
}

fn task_context(task: &Task) -> Value {
    let mut context = task.context.clone();
    context.insert("task_id".into(), json!(task.id));
    context.insert("task_type".into(), json!(task.task_type));
    context.insert("title".into(), json!(task.title));
    context.insert("description".into(), json!(task.description));
    context.insert("priority".into(), json!(task.priority));
    Value::Object(context)
}

fn agent_context(agent: &AgentDescriptor, index: usize) -> Value {
    json!({
        "agent_id": agent.id,
        "agent_type": agent.agent_type,
        "step_index": index,
        "capabilities": agent.capabilities.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
    })
}

/// Build the ordered per-agent call plan for a task.
pub fn build_plan(
    task: &Task,
    agents: &[AgentDescriptor],
    dependency_results: &Payload,
    step_timeout: Duration,
    pattern: CoordinationPattern,
) -> ExecutionPlan {
    if pattern != CoordinationPattern::Sequential {
        warn!(task_id = %task.id, pattern = ?pattern, "Coordination pattern not supported, running sequentially");
    }

    let context = task_context(task);
    let steps = agents
        .iter()
        .enumerate()
        .map(|(index, agent)| {
            let mut inputs = task.input.clone();
            inputs.insert("task_context".into(), context.clone());
            inputs.insert("agent_context".into(), agent_context(agent, index));
            if !dependency_results.is_empty() {
                inputs.insert(
                    "dependency_results".into(),
                    Value::Object(dependency_results.clone()),
                );
            }
            PlanStep {
                index,
                agent_id: agent.id.clone(),
                agent_type: agent.agent_type,
                inputs,
                expected_outputs: expected_outputs(agent, &task.input),
                timeout: step_timeout,
            }
        })
        .collect();

    ExecutionPlan {
        task_id: task.id,
        pattern: CoordinationPattern::Sequential,
        steps,
    }
}
