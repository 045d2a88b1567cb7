use crate::registry::AgentRegistry;
use crate::types::{AgentDescriptor, AgentType, Task};
use tracing::{debug, warn};

const LOAD_PENALTY: f64 = 0.3;
const COMPATIBILITY_BONUS: f64 = 0.1;

/// Agents chosen for a task, plus the required types nobody could staff.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    pub agents: Vec<AgentDescriptor>,
    pub unstaffed: Vec<AgentType>,
}

impl Assignment {
    pub fn is_complete(&self) -> bool {
        self.unstaffed.is_empty() && !self.agents.is_empty()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.id.clone()).collect()
    }
}

/// Pick one eligible agent per required type. A type with no eligible
/// candidate is recorded in `unstaffed`; the other types are still staffed.
pub fn assign_agents(task: &Task, registry: &AgentRegistry, load_threshold: f64) -> Assignment {
    let mut assignment = Assignment::default();

    for agent_type in &task.required_agents {
        let candidates = registry.eligible(*agent_type, load_threshold);
        match select_best(&candidates, task) {
            Some(best) => {
                debug!(
                    task_id = %task.id,
                    agent_type = %agent_type,
                    agent = %best.id,
                    candidates = candidates.len(),
                    "Agent selected"
                );
                assignment.agents.push(best.clone());
            }
            None => {
                warn!(task_id = %task.id, agent_type = %agent_type, "No eligible agent");
                assignment.unstaffed.push(*agent_type);
            }
        }
    }

    assignment
}

/// Selection score: performance, penalized by load, with a bonus when a
/// capability accepts one of the task's input keys.
pub fn score(agent: &AgentDescriptor, task: &Task) -> f64 {
    let bonus = if agent.is_compatible_with(&task.input) {
        COMPATIBILITY_BONUS
    } else {
        0.0
    };
    agent.metrics.performance() - LOAD_PENALTY * agent.current_load + bonus
}

/// Highest-scoring candidate; the first one wins exact ties.
pub fn select_best<'a>(candidates: &'a [AgentDescriptor], task: &Task) -> Option<&'a AgentDescriptor> {
    if candidates.len() <= 1 {
        return candidates.first();
    }
    let mut best: Option<(&AgentDescriptor, f64)> = None;
    for candidate in candidates {
        let s = score(candidate, task);
        if best.map_or(true, |(_, top)| s > top) {
            best = Some((candidate, s));
        }
    }
    best.map(|(agent, _)| agent)
}
