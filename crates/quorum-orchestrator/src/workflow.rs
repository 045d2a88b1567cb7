//! Workflow templates and their expansion into chains of dependent tasks.

use crate::gate::{self, AgentOutputs, GateReport};
use crate::types::{AgentType, Task, TaskStatus, TaskType, WorkflowStep, WorkflowTemplate};
use chrono::{DateTime, Duration, Utc};
use quorum_core::{Payload, QuorumResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use uuid::Uuid;

/// Gate every workflow step task carries. Template criteria are checked
/// against the whole run instead.
pub const STEP_GATE: &str = "all_agents_complete_successfully";

fn step(
    agent_type: AgentType,
    action: &str,
    task_type: TaskType,
    inputs: &[&str],
    outputs: &[&str],
) -> WorkflowStep {
    WorkflowStep {
        agent_type,
        action: action.to_string(),
        task_type,
        inputs: inputs.iter().map(|s| (*s).to_string()).collect(),
        outputs: outputs.iter().map(|s| (*s).to_string()).collect(),
    }
}

fn criteria(gates: &[&str]) -> Vec<String> {
    gates.iter().map(|g| (*g).to_string()).collect()
}

/// Templates available on every new coordinator.
pub fn builtin_templates() -> Vec<WorkflowTemplate> {
    use AgentType::*;
    vec![
        WorkflowTemplate {
            id: "comprehensive_product_decision".into(),
            name: "Comprehensive Product Decision".into(),
            description: "Market, user, technical and risk review feeding a final product decision"
                .into(),
            steps: vec![
                step(
                    MarketAnalyst,
                    "analyze_market_opportunity",
                    TaskType::MarketAnalysis,
                    &["market_data", "competitor_data"],
                    &["market_analysis"],
                ),
                step(
                    UxResearcher,
                    "synthesize_user_research",
                    TaskType::UserResearch,
                    &["user_feedback"],
                    &["user_insights", "user_insights_summary"],
                ),
                step(
                    TechnicalArchitect,
                    "assess_technical_feasibility",
                    TaskType::TechnicalAssessment,
                    &["technical_requirements"],
                    &["technical_assessment"],
                ),
                step(
                    RiskAssessor,
                    "assess_risks",
                    TaskType::RiskAssessment,
                    &["market_analysis", "technical_assessment"],
                    &["risks", "risk_assessment"],
                ),
                step(
                    PrioritizationExpert,
                    "prioritize_options",
                    TaskType::FeaturePrioritization,
                    &["features"],
                    &["frameworks_applied", "priority_ranking"],
                ),
                step(
                    ProductStrategist,
                    "make_product_decision",
                    TaskType::ProductDecision,
                    &["objectives"],
                    &["strategic_analysis", "recommendations"],
                ),
            ],
            success_criteria: criteria(&[
                "strategic_alignment_score >= 0.7",
                "feasibility_score >= 0.6",
                "no_critical_risks_identified",
                "all_agents_complete_successfully",
            ]),
            rollback_strategy: Some("revert_to_previous_decision".into()),
            max_execution_time_secs: Some(3600),
        },
        WorkflowTemplate {
            id: "feature_prioritization_review".into(),
            name: "Feature Prioritization Review".into(),
            description: "Data-backed prioritization checked against strategy".into(),
            steps: vec![
                step(
                    DataAnalyst,
                    "analyze_usage_data",
                    TaskType::MarketAnalysis,
                    &["usage_data", "metrics"],
                    &["data_insights"],
                ),
                step(
                    PrioritizationExpert,
                    "apply_frameworks",
                    TaskType::FeaturePrioritization,
                    &["features"],
                    &["frameworks_applied", "priority_ranking"],
                ),
                step(
                    ProductStrategist,
                    "validate_alignment",
                    TaskType::StrategicPlanning,
                    &["objectives"],
                    &["strategic_analysis"],
                ),
            ],
            success_criteria: criteria(&[
                "framework_coverage >= 3",
                "all_agents_complete_successfully",
            ]),
            rollback_strategy: None,
            max_execution_time_secs: Some(1800),
        },
        WorkflowTemplate {
            id: "api_integration_assessment".into(),
            name: "API Integration Assessment".into(),
            description: "Evaluate a third-party API before integrating it".into(),
            steps: vec![
                step(
                    ApiEvaluator,
                    "evaluate_api",
                    TaskType::ApiEvaluation,
                    &["api_responses", "api_spec"],
                    &["api_quality"],
                ),
                step(
                    TechnicalArchitect,
                    "review_integration",
                    TaskType::TechnicalAssessment,
                    &["api_quality"],
                    &["technical_assessment"],
                ),
                step(
                    RiskAssessor,
                    "assess_vendor_risk",
                    TaskType::RiskAssessment,
                    &["api_quality"],
                    &["risks"],
                ),
            ],
            success_criteria: criteria(&[
                "api_quality_score >= 70%",
                "no_critical_risks_identified",
                "no_blocking_issues",
            ]),
            rollback_strategy: None,
            max_execution_time_secs: Some(1200),
        },
    ]
}

/// Read custom templates from a JSON file holding an array of templates.
pub fn load_templates(path: &Path) -> QuorumResult<Vec<WorkflowTemplate>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// One execution of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub template_id: String,
    /// Step tasks in step order.
    pub task_ids: Vec<Uuid>,
    pub success_criteria: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Turn a template into one task per step. Each task depends on every
/// earlier step task and records `workflow_id` and `step_number` in its context.
/// A time limit too large to represent as a date leaves the steps without a deadline.
pub fn expand(
    template: &WorkflowTemplate,
    workflow_id: Uuid,
    input: &Payload,
    context: &Payload,
) -> Vec<Task> {
    let deadline = template
        .max_execution_time_secs
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(Duration::try_seconds)
        .and_then(|limit| Utc::now().checked_add_signed(limit));

    let mut tasks: Vec<Task> = Vec::with_capacity(template.steps.len());
    for (number, step) in template.steps.iter().enumerate() {
        let mut task = Task::new(step.task_type, format!("{}: {}", template.name, step.action))
            .with_input(input.clone())
            .with_dependencies(tasks.iter().map(|t| t.id).collect());
        task.description = format!("{} ({})", step.action, step.agent_type);
        task.required_agents = vec![step.agent_type];
        task.quality_gates = vec![STEP_GATE.to_string()];
        task.deadline = deadline;
        task.workflow_id = Some(workflow_id);
        task.context = context.clone();
        task.context.insert("workflow_id".into(), json!(workflow_id));
        task.context.insert("step_number".into(), json!(number + 1));
        task.context.insert("template_id".into(), json!(template.id));
        task.context.insert("action".into(), json!(step.action));
        tasks.push(task);
    }
    tasks
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Running,
    Succeeded,
    Failed,
}

/// Progress of a workflow run. `criteria` is filled in once every step is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub workflow_id: Uuid,
    pub template_id: String,
    pub state: WorkflowState,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub criteria: Option<GateReport>,
}

/// Outputs of all step tasks, keyed `step<N>:<agent id>`.
pub fn merged_outputs(steps: &[&Task]) -> AgentOutputs {
    let mut outputs = AgentOutputs::new();
    for (number, task) in steps.iter().enumerate() {
        for (agent_id, value) in &task.output {
            if let Value::Object(payload) = value {
                outputs.insert(format!("step{}:{agent_id}", number + 1), payload.clone());
            }
        }
    }
    outputs
}

/// Evaluate a run from its step tasks (in step order).
pub fn evaluate_run(run: &WorkflowRun, steps: &[&Task]) -> WorkflowStatus {
    let completed_steps = steps
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    let failed_steps = steps
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Cancelled))
        .count();
    let all_terminal = steps.len() == run.task_ids.len() && steps.iter().all(|t| t.status.is_terminal());

    let (state, criteria) = if !all_terminal {
        (WorkflowState::Running, None)
    } else {
        let report = gate::evaluate_all(&run.success_criteria, &merged_outputs(steps));
        let state = if failed_steps == 0 && report.passed {
            WorkflowState::Succeeded
        } else {
            WorkflowState::Failed
        };
        (state, Some(report))
    };

    WorkflowStatus {
        workflow_id: run.id,
        template_id: run.template_id.clone(),
        state,
        total_steps: run.task_ids.len(),
        completed_steps,
        failed_steps,
        criteria,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(id: &str) -> WorkflowTemplate {
        builtin_templates()
            .into_iter()
            .find(|t| t.id == id)
            .unwrap()
    }

    #[test]
    fn test_builtin_criteria_parse() {
        for template in builtin_templates() {
            assert!(!template.steps.is_empty());
            for criterion in &template.success_criteria {
                assert!(gate::parse(criterion).is_ok(), "{criterion}");
            }
        }
    }

    #[test]
    fn test_expand_chains_all_earlier_steps() {
        let template = template("comprehensive_product_decision");
        let workflow_id = Uuid::new_v4();
        let mut context = Payload::new();
        context.insert("requested_by".into(), json!("pm"));
        let tasks = expand(&template, workflow_id, &Payload::new(), &context);

        assert_eq!(tasks.len(), template.steps.len());
        for (i, task) in tasks.iter().enumerate() {
            let earlier: Vec<Uuid> = tasks[..i].iter().map(|t| t.id).collect();
            assert_eq!(task.dependencies, earlier);
            assert_eq!(task.required_agents, vec![template.steps[i].agent_type]);
            assert_eq!(task.context["step_number"], json!(i + 1));
            assert_eq!(task.context["workflow_id"], json!(workflow_id));
            assert_eq!(task.context["requested_by"], json!("pm"));
            assert_eq!(task.workflow_id, Some(workflow_id));
            assert!(task.deadline.is_some());
        }
    }

    #[test]
    fn test_load_templates_from_json() {
        use quorum_core::QuorumError;
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{
                "id": "vendor_review",
                "name": "Vendor Review",
                "description": "Risk pass over a vendor API",
                "steps": [
                    {{"agent_type": "api_evaluator", "action": "evaluate_api", "task_type": "api_evaluation"}},
                    {{"agent_type": "risk_assessor", "action": "assess_risks", "task_type": "risk_assessment"}}
                ],
                "success_criteria": ["no_critical_risks_identified"]
            }}]"#
        )
        .unwrap();
        let templates = load_templates(file.path()).unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].steps[1].agent_type, AgentType::RiskAssessor);
        assert_eq!(templates[0].max_execution_time_secs, None);

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "[{{\"id\": 1}}]").unwrap();
        assert!(matches!(
            load_templates(broken.path()),
            Err(QuorumError::Json(_))
        ));
        assert!(matches!(
            load_templates(Path::new("/nonexistent/templates.json")),
            Err(QuorumError::Io(_))
        ));
    }

    #[test]
    fn test_unrepresentable_time_limit_means_no_deadline() {
        let mut template = template("api_integration_assessment");
        for secs in [u64::MAX / 2, i64::MAX as u64, u64::MAX] {
            template.max_execution_time_secs = Some(secs);
            let tasks = expand(&template, Uuid::new_v4(), &Payload::new(), &Payload::new());
            assert_eq!(tasks.len(), template.steps.len());
            assert!(tasks.iter().all(|t| t.deadline.is_none()), "{secs}");
        }
    }

    fn finished(status: TaskStatus, agent: &str, output: Value) -> Task {
        let mut task = Task::new(TaskType::RiskAssessment, "step");
        task.status = status;
        task.output
            .insert(agent.to_string(), output);
        task
    }

    fn run_for(tasks: &[&Task], criteria: &[&str]) -> WorkflowRun {
        WorkflowRun {
            id: Uuid::new_v4(),
            template_id: "custom".into(),
            task_ids: tasks.iter().map(|t| t.id).collect(),
            success_criteria: criteria.iter().map(|c| (*c).to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_running_until_all_terminal() {
        let done = finished(TaskStatus::Completed, "a", json!({"success": true}));
        let pending = Task::new(TaskType::RiskAssessment, "later");
        let steps = [&done, &pending];
        let status = evaluate_run(&run_for(&steps, &["no_blocking_issues"]), &steps);
        assert_eq!(status.state, WorkflowState::Running);
        assert_eq!(status.completed_steps, 1);
        assert!(status.criteria.is_none());
    }

    #[test]
    fn test_criteria_evaluated_over_merged_outputs() {
        let first = finished(
            TaskStatus::Completed,
            "strategist",
            json!({"success": true, "strategic_analysis": {"alignment_score": 0.9}}),
        );
        let second = finished(TaskStatus::Completed, "strategist", json!({"success": true}));
        let steps = [&first, &second];
        let status = evaluate_run(
            &run_for(
                &steps,
                &["strategic_alignment_score >= 0.7", "all_agents_complete_successfully"],
            ),
            &steps,
        );
        assert_eq!(status.state, WorkflowState::Succeeded);
        assert_eq!(merged_outputs(&steps).len(), 2);
    }

    #[test]
    fn test_failed_step_fails_run() {
        let first = finished(TaskStatus::Failed, "a", json!({"success": false}));
        let second = finished(TaskStatus::Cancelled, "b", json!({}));
        let steps = [&first, &second];
        let status = evaluate_run(&run_for(&steps, &[]), &steps);
        assert_eq!(status.state, WorkflowState::Failed);
        assert_eq!(status.failed_steps, 2);
    }
}
