use thiserror::Error;
use uuid::Uuid;

/// A convenience `Result` alias using [`QuorumError`].
pub type QuorumResult<T> = Result<T, QuorumError>;

/// Top-level error type for the Quorum engine.
///
/// Only [`QuorumError::Configuration`], [`QuorumError::TaskNotFound`] and the
/// registration errors ever reach a caller of the coordinator; the remaining
/// variants are produced inside a coordination and folded into a failed
/// task and its result.
#[derive(Error, Debug)]
pub enum QuorumError {
    /// Invalid configuration, unknown workflow template, or a malformed task graph.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The referenced task id is not known to the coordinator.
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// The referenced agent id is not registered.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// An agent descriptor failed validation at registration.
    #[error("Invalid agent descriptor: {0}")]
    InvalidAgent(String),

    /// No eligible agent could be found for one or more required agent types.
    #[error("No agent available: {0}")]
    NoAgentAvailable(String),

    /// A capability handler returned an error or panicked.
    #[error("Agent execution error ({agent_id}): {message}")]
    AgentExecution {
        /// The agent whose step failed.
        agent_id: String,
        /// Handler-provided failure description.
        message: String,
    },

    /// A plan step exceeded its timeout.
    #[error("Step timed out after {secs}s on agent {agent_id}")]
    StepTimeout {
        /// The agent running the step.
        agent_id: String,
        /// The timeout that elapsed, in seconds.
        secs: u64,
    },

    /// The coordination was cancelled (deadline reached or forced shutdown).
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// One or more quality gates failed.
    #[error("Quality gate failure: {0}")]
    QualityGate(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = QuorumError::Configuration("unknown workflow template 'x'".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: unknown workflow template 'x'"
        );

        let err = QuorumError::AgentExecution {
            agent_id: "risk_assessor_1".into(),
            message: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "Agent execution error (risk_assessor_1): boom"
        );

        let err = QuorumError::StepTimeout {
            agent_id: "a".into(),
            secs: 300,
        };
        assert!(err.to_string().contains("300s"));
    }

    #[test]
    fn test_from_serde_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: QuorumError = parse_err.into();
        assert!(matches!(err, QuorumError::Json(_)));
    }
}
