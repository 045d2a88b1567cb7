//! Static routing tables: which agents and which quality gates a task gets
//! when the caller does not specify them.

use crate::types::{AgentType, TaskType};
use quorum_core::Payload;
use regex::Regex;
use std::sync::LazyLock;

/// Input-key patterns that pull an extra agent type into a task.
static SIGNAL_TERMS: LazyLock<Vec<(Regex, AgentType)>> = LazyLock::new(|| {
    [
        (r"^api_(responses|spec)$|endpoints", AgentType::ApiEvaluator),
        (r"user_feedback|interviews|survey", AgentType::UxResearcher),
        (r"^metrics$|experiment|usage_data", AgentType::DataAnalyst),
        (r"risk", AgentType::RiskAssessor),
        (r"market|competitor", AgentType::MarketAnalyst),
    ]
    .into_iter()
    .filter_map(|(pattern, agent)| Regex::new(pattern).ok().map(|re| (re, agent)))
    .collect()
});

/// Default agent team per task type.
pub fn default_agents(task_type: TaskType) -> Vec<AgentType> {
    use AgentType::*;
    match task_type {
        TaskType::FeaturePrioritization => vec![PrioritizationExpert, ProductStrategist],
        TaskType::StrategicPlanning => vec![ProductStrategist, MarketAnalyst],
        TaskType::MarketAnalysis => vec![MarketAnalyst],
        TaskType::UserResearch => vec![UxResearcher],
        TaskType::TechnicalAssessment => vec![TechnicalArchitect, RiskAssessor],
        TaskType::ApiEvaluation => vec![ApiEvaluator],
        TaskType::RiskAssessment => vec![RiskAssessor],
        TaskType::ProductDecision => vec![
            ProductStrategist,
            MarketAnalyst,
            TechnicalArchitect,
            RiskAssessor,
        ],
    }
}

/// Agent types signalled by the presence of particular input keys.
pub fn signal_agents(input: &Payload) -> Vec<AgentType> {
    let mut found = Vec::new();
    for (pattern, agent) in SIGNAL_TERMS.iter() {
        if input.keys().any(|k| pattern.is_match(k)) && !found.contains(agent) {
            found.push(*agent);
        }
    }
    found
}

/// The type's default team, augmented by input signals. Order is stable and
/// duplicates are dropped.
pub fn resolve_required_agents(task_type: TaskType, input: &Payload) -> Vec<AgentType> {
    let mut agents = default_agents(task_type);
    for agent in signal_agents(input) {
        if !agents.contains(&agent) {
            agents.push(agent);
        }
    }
    agents
}

/// Default quality gates per task type.
pub fn default_quality_gates(task_type: TaskType) -> Vec<String> {
    let gates: &[&str] = match task_type {
        TaskType::FeaturePrioritization => &[
            "framework_coverage >= 3",
            "all_agents_complete_successfully",
        ],
        TaskType::StrategicPlanning => &[
            "strategic_alignment_score >= 0.7",
            "all_agents_complete_successfully",
        ],
        TaskType::MarketAnalysis => &["market_opportunity_score >= 0.6", "no_blocking_issues"],
        TaskType::UserResearch => &["insight_count >= 3", "no_blocking_issues"],
        TaskType::TechnicalAssessment => &[
            "feasibility_score >= 0.6",
            "no_critical_risks_identified",
        ],
        TaskType::ApiEvaluation => &["api_quality_score >= 70%", "no_blocking_issues"],
        TaskType::RiskAssessment => &[
            "no_critical_risks_identified",
            "all_agents_complete_successfully",
        ],
        TaskType::ProductDecision => &[
            "strategic_alignment_score >= 0.7",
            "no_critical_risks_identified",
            "all_agents_complete_successfully",
        ],
    };
    gates.iter().map(|g| (*g).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_feature_prioritization_defaults() {
        let agents = resolve_required_agents(TaskType::FeaturePrioritization, &Payload::new());
        assert_eq!(agents, default_agents(TaskType::FeaturePrioritization));
    }

    #[test]
    fn test_api_responses_signal() {
        let agents = resolve_required_agents(
            TaskType::FeaturePrioritization,
            &input(json!({"api_responses": [], "features": []})),
        );
        assert!(agents.contains(&AgentType::ApiEvaluator));
        assert_eq!(agents[0], AgentType::PrioritizationExpert);
    }

    #[test]
    fn test_signal_does_not_duplicate() {
        let agents = resolve_required_agents(
            TaskType::MarketAnalysis,
            &input(json!({"market_data": {}, "competitors": []})),
        );
        assert_eq!(agents, vec![AgentType::MarketAnalyst]);
    }

    #[test]
    fn test_every_type_has_gates() {
        for t in [
            TaskType::FeaturePrioritization,
            TaskType::StrategicPlanning,
            TaskType::MarketAnalysis,
            TaskType::UserResearch,
            TaskType::TechnicalAssessment,
            TaskType::ApiEvaluation,
            TaskType::RiskAssessment,
            TaskType::ProductDecision,
        ] {
            assert!(!default_quality_gates(t).is_empty());
            assert!(!default_agents(t).is_empty());
        }
    }
}
