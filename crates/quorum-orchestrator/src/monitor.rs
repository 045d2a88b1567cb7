use crate::types::{AgentDescriptor, AgentStatus, AgentType, CoordinationResult, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

/// Bounded log of coordination results. Once full, the oldest result is dropped.
pub struct HistoryLog {
    results: VecDeque<CoordinationResult>,
    capacity: usize,
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            results: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, result: CoordinationResult) {
        if self.results.len() == self.capacity {
            self.results.pop_front();
        }
        self.results.push_back(result);
    }

    /// Up to `n` most recent results, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &CoordinationResult> {
        self.results.iter().skip(self.results.len().saturating_sub(n))
    }

    /// Latest result recorded for a task.
    pub fn latest_for(&self, task_id: Uuid) -> Option<&CoordinationResult> {
        self.results.iter().rev().find(|r| r.task_id == task_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLabel {
    Healthy,
    Degraded,
    Critical,
}

impl HealthLabel {
    /// Label for a success rate over the recent window.
    pub fn from_success_rate(rate: f64) -> Self {
        if rate > 0.8 {
            HealthLabel::Healthy
        } else if rate > 0.5 {
            HealthLabel::Degraded
        } else {
            HealthLabel::Critical
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentTypeSummary {
    pub total: usize,
    pub available: usize,
    pub busy: usize,
    pub average_load: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// Number of results the averages cover.
    pub window: usize,
    pub average_execution_ms: f64,
    pub success_rate: f64,
    pub average_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub agents_by_type: BTreeMap<AgentType, AgentTypeSummary>,
    pub tasks_by_status: BTreeMap<TaskStatus, usize>,
    pub recent: PerformanceSummary,
    pub health: HealthLabel,
    pub history_len: usize,
}

impl SystemStatus {
    /// Serialize for dashboards.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "agents": self.agents_by_type,
            "tasks": self.tasks_by_status,
            "recent_performance": self.recent,
            "health": self.health,
            "history_len": self.history_len,
        })
    }
}

pub fn summarize_agents(agents: &[AgentDescriptor]) -> BTreeMap<AgentType, AgentTypeSummary> {
    let mut summary: BTreeMap<AgentType, AgentTypeSummary> = BTreeMap::new();
    let mut load_sums: BTreeMap<AgentType, f64> = BTreeMap::new();
    for agent in agents {
        let entry = summary.entry(agent.agent_type).or_default();
        entry.total += 1;
        match agent.status {
            AgentStatus::Available => entry.available += 1,
            AgentStatus::Busy => entry.busy += 1,
            _ => {}
        }
        *load_sums.entry(agent.agent_type).or_insert(0.0) += agent.current_load;
    }
    for (agent_type, entry) in summary.iter_mut() {
        entry.average_load = load_sums[agent_type] / entry.total as f64;
    }
    summary
}

/// Averages over the most recent `window` results. An empty window is healthy.
pub fn summarize_recent(history: &HistoryLog, window: usize) -> (PerformanceSummary, HealthLabel) {
    let recent: Vec<&CoordinationResult> = history.recent(window).collect();
    if recent.is_empty() {
        return (
            PerformanceSummary {
                window: 0,
                average_execution_ms: 0.0,
                success_rate: 1.0,
                average_confidence: 0.0,
            },
            HealthLabel::Healthy,
        );
    }

    let n = recent.len() as f64;
    let successes = recent.iter().filter(|r| r.success).count() as f64;
    let success_rate = successes / n;
    let summary = PerformanceSummary {
        window: recent.len(),
        average_execution_ms: recent.iter().map(|r| r.execution_time_ms as f64).sum::<f64>() / n,
        success_rate,
        average_confidence: recent.iter().map(|r| r.confidence_score).sum::<f64>() / n,
    };
    (summary, HealthLabel::from_success_rate(success_rate))
}
