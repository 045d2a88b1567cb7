use crate::types::AgentType;
use async_trait::async_trait;
use quorum_core::payload::{get_bool, get_f64};
use quorum_core::{Payload, QuorumError, QuorumResult};
use serde_json::json;
use std::collections::HashMap;

/// Business logic behind an agent type.
///
/// The engine only calls `invoke` and reads the returned shape: a `success`
/// flag, optional `confidence` and `processing_time` (seconds), plus any
/// domain fields the quality gates and recommendations look at.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn invoke(&self, agent_type: AgentType, inputs: Payload) -> QuorumResult<Payload>;
}

/// How the engine reads a handler payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub success: bool,
    pub confidence: f64,
    /// Seconds.
    pub processing_time: f64,
}

impl StepOutcome {
    /// Interpret a payload. A missing `success` counts as success; missing
    /// confidence follows success; missing time uses the measured elapsed time.
    pub fn from_payload(output: &Payload, elapsed_secs: f64) -> Self {
        let success = get_bool(output, "success").unwrap_or(true);
        let confidence = get_f64(output, "confidence")
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(if success { 1.0 } else { 0.0 });
        let processing_time = get_f64(output, "processing_time").unwrap_or(elapsed_secs);
        Self {
            success,
            confidence,
            processing_time,
        }
    }
}

/// Returns a canned payload per agent type. Used by the CLI's dry runs and
/// in tests.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHandler {
    responses: HashMap<AgentType, Payload>,
    fallback: Option<Payload>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, agent_type: AgentType, payload: Payload) -> Self {
        self.responses.insert(agent_type, payload);
        self
    }

    /// Payload for agent types without a scripted response.
    pub fn with_fallback(mut self, payload: Payload) -> Self {
        self.fallback = Some(payload);
        self
    }

    /// A handler that answers every type with `{"success": true, "confidence": 0.9}`.
    pub fn succeed_all() -> Self {
        let mut ok = Payload::new();
        ok.insert("success".into(), json!(true));
        ok.insert("confidence".into(), json!(0.9));
        Self::new().with_fallback(ok)
    }
}

#[async_trait]
impl CapabilityHandler for ScriptedHandler {
    async fn invoke(&self, agent_type: AgentType, _inputs: Payload) -> QuorumResult<Payload> {
        self.responses
            .get(&agent_type)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| QuorumError::AgentExecution {
                agent_id: agent_type.to_string(),
                message: "no scripted response".into(),
            })
    }
}
