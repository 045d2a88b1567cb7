use crate::types::{AgentDescriptor, AgentMetrics, AgentType, Capability};

/// Module locator probed by discovery for each agent type.
pub fn locator(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::ProductStrategist => "agents::strategy::product_strategist",
        AgentType::MarketAnalyst => "agents::market::market_analyst",
        AgentType::UxResearcher => "agents::ux::ux_researcher",
        AgentType::TechnicalArchitect => "agents::engineering::technical_architect",
        AgentType::ApiEvaluator => "agents::engineering::api_evaluator",
        AgentType::RiskAssessor => "agents::risk::risk_assessor",
        AgentType::DataAnalyst => "agents::data::data_analyst",
        AgentType::PrioritizationExpert => "agents::strategy::prioritization_expert",
    }
}

/// Build the default descriptor for a discovered agent of the given type.
pub fn default_descriptor(agent_type: AgentType) -> AgentDescriptor {
    let capabilities = default_capabilities(agent_type);
    let estimate = capabilities
        .iter()
        .map(|c| c.processing_time_estimate)
        .fold(0.0, f64::max);

    AgentDescriptor::new(format!("{agent_type}_default"), agent_type)
        .with_capabilities(capabilities)
        .with_metrics(AgentMetrics {
            accuracy: 0.85,
            avg_processing_time: estimate,
            ..AgentMetrics::default()
        })
}

/// Static capability catalog.
pub fn default_capabilities(agent_type: AgentType) -> Vec<Capability> {
    match agent_type {
        AgentType::ProductStrategist => strategist_capabilities(),
        AgentType::MarketAnalyst => market_capabilities(),
        AgentType::UxResearcher => ux_capabilities(),
        AgentType::TechnicalArchitect => architect_capabilities(),
        AgentType::ApiEvaluator => api_capabilities(),
        AgentType::RiskAssessor => risk_capabilities(),
        AgentType::DataAnalyst => data_capabilities(),
        AgentType::PrioritizationExpert => prioritization_capabilities(),
    }
}

fn strategist_capabilities() -> Vec<Capability> {
    vec![
        Capability::new(
            "strategic_alignment",
            &["product_vision", "objectives", "feature_description"],
            &["strategic_analysis", "alignment_score", "recommendations"],
        )
        .with_estimate(45.0)
        .with_quality_metrics(&["alignment_score"]),
        Capability::new(
            "roadmap_review",
            &["roadmap", "objectives"],
            &["roadmap_assessment", "next_actions"],
        )
        .with_estimate(60.0),
    ]
}

fn market_capabilities() -> Vec<Capability> {
    vec![Capability::new(
        "market_assessment",
        &["market_data", "competitors", "feature_description"],
        &["market_analysis", "market_opportunity_score", "competitive_gaps"],
    )
    .with_estimate(60.0)
    .with_quality_metrics(&["market_opportunity_score"])]
}

fn ux_capabilities() -> Vec<Capability> {
    vec![Capability::new(
        "user_research_synthesis",
        &["user_feedback", "interviews", "survey_results"],
        &["user_insights", "usability_score", "personas"],
    )
    .with_estimate(50.0)
    .with_quality_metrics(&["usability_score", "insight_count"])]
}

fn architect_capabilities() -> Vec<Capability> {
    vec![Capability::new(
        "feasibility_review",
        &["technical_requirements", "architecture", "feature_description"],
        &["technical_assessment", "feasibility_score", "effort_estimate"],
    )
    .with_estimate(40.0)
    .with_quality_metrics(&["feasibility_score"])]
}

fn api_capabilities() -> Vec<Capability> {
    vec![Capability::new(
        "api_evaluation",
        &["api_responses", "api_spec", "endpoints"],
        &["api_quality", "api_quality_score", "breaking_changes"],
    )
    .with_estimate(30.0)
    .with_quality_metrics(&["api_quality_score"])]
}

fn risk_capabilities() -> Vec<Capability> {
    vec![Capability::new(
        "risk_assessment",
        &["feature_description", "technical_requirements", "market_data"],
        &["risks", "risk_score", "mitigations"],
    )
    .with_estimate(35.0)
    .with_quality_metrics(&["risk_score"])]
}

fn data_capabilities() -> Vec<Capability> {
    vec![Capability::new(
        "metrics_analysis",
        &["metrics", "experiment_results", "usage_data"],
        &["data_insights", "statistical_confidence", "kpis"],
    )
    .with_estimate(40.0)
    .with_quality_metrics(&["statistical_confidence"])]
}

fn prioritization_capabilities() -> Vec<Capability> {
    vec![Capability::new(
        "framework_scoring",
        &["features", "backlog", "objectives"],
        &["prioritized_features", "frameworks_applied", "priority_scores"],
    )
    .with_estimate(45.0)
    .with_quality_metrics(&["framework_coverage"])]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_has_capabilities() {
        for t in AgentType::ALL {
            let caps = default_capabilities(t);
            assert!(!caps.is_empty(), "{t} has no capabilities");
            assert!(caps.iter().all(|c| !c.output_types.is_empty()));
        }
    }

    #[test]
    fn test_default_descriptor() {
        let d = default_descriptor(AgentType::ApiEvaluator);
        assert_eq!(d.id, "api_evaluator_default");
        assert_eq!(d.agent_type, AgentType::ApiEvaluator);
        assert_eq!(d.current_load, 0.0);
        assert_eq!(d.metrics.avg_processing_time, 30.0);
    }

    #[test]
    fn test_locators_unique() {
        let mut seen = std::collections::HashSet::new();
        for t in AgentType::ALL {
            assert!(seen.insert(locator(t)));
        }
    }
}
