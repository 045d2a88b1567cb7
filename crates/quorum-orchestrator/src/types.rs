use crate::gate::GateResult;
use chrono::{DateTime, Utc};
use quorum_core::Payload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Category of worker in the agent team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Strategic alignment and vision fit.
    ProductStrategist,
    /// Market sizing and competitive landscape.
    MarketAnalyst,
    /// User research synthesis and usability.
    UxResearcher,
    /// Feasibility, architecture and effort estimates.
    TechnicalArchitect,
    /// API surface review and integration quality.
    ApiEvaluator,
    /// Risk identification and mitigation.
    RiskAssessor,
    /// Metrics, experiments and data analysis.
    DataAnalyst,
    /// Prioritization frameworks (RICE, Kano, MoSCoW...).
    PrioritizationExpert,
}

impl AgentType {
    /// Every agent type, in declaration order.
    pub const ALL: [AgentType; 8] = [
        AgentType::ProductStrategist,
        AgentType::MarketAnalyst,
        AgentType::UxResearcher,
        AgentType::TechnicalArchitect,
        AgentType::ApiEvaluator,
        AgentType::RiskAssessor,
        AgentType::DataAnalyst,
        AgentType::PrioritizationExpert,
    ];

    /// Snake-case name, as used in payloads and agent ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::ProductStrategist => "product_strategist",
            AgentType::MarketAnalyst => "market_analyst",
            AgentType::UxResearcher => "ux_researcher",
            AgentType::TechnicalArchitect => "technical_architect",
            AgentType::ApiEvaluator => "api_evaluator",
            AgentType::RiskAssessor => "risk_assessor",
            AgentType::DataAnalyst => "data_analyst",
            AgentType::PrioritizationExpert => "prioritization_expert",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown agent type '{s}'"))
    }
}

/// Availability of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Available,
    Busy,
    Maintenance,
    Offline,
    Error,
}

/// A named unit of work an agent performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    /// Input-kind tags this capability accepts (matched against task input keys).
    pub input_types: Vec<String>,
    /// Output-kind tags this capability produces.
    pub output_types: Vec<String>,
    /// Expected processing time in seconds.
    pub processing_time_estimate: f64,
    #[serde(default)]
    pub resource_requirements: Payload,
    #[serde(default)]
    pub quality_metrics: Vec<String>,
}

impl Capability {
    pub fn new(name: impl Into<String>, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            name: name.into(),
            input_types: inputs.iter().map(|s| (*s).to_string()).collect(),
            output_types: outputs.iter().map(|s| (*s).to_string()).collect(),
            processing_time_estimate: 30.0,
            resource_requirements: Payload::new(),
            quality_metrics: Vec::new(),
        }
    }

    pub fn with_estimate(mut self, secs: f64) -> Self {
        self.processing_time_estimate = secs;
        self
    }

    pub fn with_quality_metrics(mut self, metrics: &[&str]) -> Self {
        self.quality_metrics = metrics.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// True when any accepted input tag is one of `keys`.
    pub fn accepts_any<'a>(&self, mut keys: impl Iterator<Item = &'a String>) -> bool {
        keys.any(|k| self.input_types.iter().any(|t| t == k))
    }
}

/// Rolling performance metrics for an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub accuracy: f64,
    /// Seconds, exponential moving average.
    pub avg_processing_time: f64,
    pub success_rate: f64,
    #[serde(default)]
    pub tasks_completed: u64,
    #[serde(default)]
    pub tasks_failed: u64,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self {
            accuracy: 0.8,
            avg_processing_time: 0.0,
            success_rate: 1.0,
            tasks_completed: 0,
            tasks_failed: 0,
        }
    }
}

impl AgentMetrics {
    const EMA_KEEP: f64 = 0.8;
    const EMA_NEW: f64 = 0.2;
    const FAILURE_DECAY: f64 = 0.9;

    /// Fold one step outcome into the rolling metrics.
    pub fn record(&mut self, confidence: f64, processing_time: f64, success: bool) {
        self.accuracy = self.accuracy * Self::EMA_KEEP + confidence * Self::EMA_NEW;
        self.avg_processing_time =
            self.avg_processing_time * Self::EMA_KEEP + processing_time * Self::EMA_NEW;
        if success {
            self.tasks_completed += 1;
        } else {
            self.tasks_failed += 1;
            self.success_rate *= Self::FAILURE_DECAY;
        }
        self.success_rate = self.success_rate.min(1.0);
    }

    /// Average performance used by agent selection.
    pub fn performance(&self) -> f64 {
        (self.accuracy + self.success_rate) / 2.0
    }
}

/// Snapshot of a registered worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub agent_type: AgentType,
    pub capabilities: Vec<Capability>,
    pub status: AgentStatus,
    /// Fraction of capacity in use, 0.0–1.0.
    pub current_load: f64,
    pub max_concurrent_tasks: u32,
    pub metrics: AgentMetrics,
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            id: id.into(),
            agent_type,
            capabilities: Vec::new(),
            status: AgentStatus::Available,
            current_load: 0.0,
            max_concurrent_tasks: 3,
            metrics: AgentMetrics::default(),
            last_heartbeat: Utc::now(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_load(mut self, load: f64) -> Self {
        self.current_load = load;
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_metrics(mut self, metrics: AgentMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// True when some capability accepts one of the task's input keys.
    pub fn is_compatible_with(&self, input: &Payload) -> bool {
        self.capabilities.iter().any(|c| c.accepts_any(input.keys()))
    }
}

/// Kind of work a task represents. Drives the default agent and gate tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FeaturePrioritization,
    StrategicPlanning,
    MarketAnalysis,
    UserResearch,
    TechnicalAssessment,
    ApiEvaluation,
    RiskAssessment,
    ProductDecision,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::FeaturePrioritization => "feature_prioritization",
            TaskType::StrategicPlanning => "strategic_planning",
            TaskType::MarketAnalysis => "market_analysis",
            TaskType::UserResearch => "user_research",
            TaskType::TechnicalAssessment => "technical_assessment",
            TaskType::ApiEvaluation => "api_evaluation",
            TaskType::RiskAssessment => "risk_assessment",
            TaskType::ProductDecision => "product_decision",
        };
        f.write_str(s)
    }
}

/// Task urgency. Declaration order is dispatch order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Background,
}

impl TaskPriority {
    /// Smaller is more urgent.
    pub fn rank(&self) -> u8 {
        *self as u8
    }
}

/// Status of a task in the coordination state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    WaitingDependency,
    Validation,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::WaitingDependency => "waiting_dependency",
            TaskStatus::Validation => "validation",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A unit of coordinated work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub input: Payload,
    pub output: Payload,
    pub required_agents: Vec<AgentType>,
    pub assigned_agents: Vec<String>,
    pub dependencies: Vec<Uuid>,
    pub quality_gates: Vec<String>,
    /// Coordination is cancelled once this instant passes.
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(default)]
    pub context: Payload,
    #[serde(default)]
    pub workflow_id: Option<Uuid>,
}

impl Task {
    pub fn new(task_type: TaskType, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            title: title.into(),
            description: String::new(),
            priority: TaskPriority::default(),
            status: TaskStatus::Pending,
            input: Payload::new(),
            output: Payload::new(),
            required_agents: Vec::new(),
            assigned_agents: Vec::new(),
            dependencies: Vec::new(),
            quality_gates: Vec::new(),
            deadline: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            context: Payload::new(),
            workflow_id: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_input(mut self, input: Payload) -> Self {
        self.input = input;
        self
    }

    /// Key used by the ready queue: `(priority rank, task id)`.
    pub fn queue_key(&self) -> (u8, Uuid) {
        (self.priority.rank(), self.id)
    }
}

/// One step of a workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub agent_type: AgentType,
    pub action: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// A named ordered process that expands into a chain of dependent tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub rollback_strategy: Option<String>,
    #[serde(default)]
    pub max_execution_time_secs: Option<u64>,
}

/// Outcome of one `coordinate()` call. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationResult {
    pub task_id: Uuid,
    pub success: bool,
    /// Output payload per agent id.
    pub agent_outputs: BTreeMap<String, Payload>,
    pub execution_time_ms: u64,
    /// Observed value per gate expression.
    pub quality_scores: BTreeMap<String, f64>,
    pub recommendations: Vec<String>,
    pub next_actions: Vec<String>,
    pub confidence_score: f64,
    pub validation_results: Vec<GateResult>,
    pub failed_gates: Vec<String>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl CoordinationResult {
    /// A result carrying no agent output. `failed_check` names the condition
    /// that did not hold, so `success == failed_gates.is_empty()` holds here too.
    pub fn failure(
        task_id: Uuid,
        failed_check: &str,
        error: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            task_id,
            success: false,
            agent_outputs: BTreeMap::new(),
            execution_time_ms,
            quality_scores: BTreeMap::new(),
            recommendations: Vec::new(),
            next_actions: Vec::new(),
            confidence_score: 0.0,
            validation_results: Vec::new(),
            failed_gates: vec![failed_check.to_string()],
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_creation() {
        let task = Task::new(TaskType::MarketAnalysis, "Size the EU market");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(task.dependencies.is_empty());
        assert!(task.assigned_agents.is_empty());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical < TaskPriority::High);
        assert!(TaskPriority::Low < TaskPriority::Background);
        assert_eq!(TaskPriority::Critical.rank(), 0);
        assert_eq!(TaskPriority::Background.rank(), 4);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::WaitingDependency.is_terminal());
    }

    #[test]
    fn test_agent_type_roundtrip_names() {
        for t in AgentType::ALL {
            assert_eq!(t.as_str().parse::<AgentType>().unwrap(), t);
        }
        assert!("nope".parse::<AgentType>().is_err());
        let json = serde_json::to_string(&AgentType::ApiEvaluator).unwrap();
        assert_eq!(json, "\"api_evaluator\"");
    }

    #[test]
    fn test_metrics_ema() {
        let mut m = AgentMetrics {
            accuracy: 0.5,
            avg_processing_time: 10.0,
            success_rate: 1.0,
            tasks_completed: 0,
            tasks_failed: 0,
        };
        m.record(1.0, 20.0, true);
        assert!((m.accuracy - 0.6).abs() < 1e-9);
        assert!((m.avg_processing_time - 12.0).abs() < 1e-9);
        assert_eq!(m.success_rate, 1.0);

        m.record(0.0, 20.0, false);
        assert!((m.success_rate - 0.9).abs() < 1e-9);
        assert_eq!(m.tasks_failed, 1);
    }

    #[test]
    fn test_failure_result_names_failed_check() {
        let result = CoordinationResult::failure(Uuid::new_v4(), "agents_staffed", "no agent", 3);
        assert!(!result.success);
        assert_eq!(result.failed_gates, vec!["agents_staffed"]);
        assert_eq!(result.error.as_deref(), Some("no agent"));
    }

    #[test]
    fn test_compatibility() {
        let agent = AgentDescriptor::new("a1", AgentType::ApiEvaluator).with_capabilities(vec![
            Capability::new("api_review", &["api_responses"], &["api_quality"]),
        ]);
        let compatible = json!({"api_responses": []}).as_object().cloned().unwrap();
        let other = json!({"features": []}).as_object().cloned().unwrap();
        assert!(agent.is_compatible_with(&compatible));
        assert!(!agent.is_compatible_with(&other));
    }
}
