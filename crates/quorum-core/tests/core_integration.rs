#![allow(clippy::unwrap_used, clippy::expect_used)]

use quorum_core::payload::{as_f64, get_bool, get_path, merge};
use quorum_core::*;
use serde_json::json;
use uuid::Uuid;

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap()
}

// ---------------------------------------------------------------------------
// 1. Agent output shapes resolve through dotted paths
// ---------------------------------------------------------------------------

#[test]
fn agent_output_paths_resolve() {
    let output = payload(json!({
        "success": true,
        "strategic_analysis": {"alignment_score": 0.82},
        "risks": [{"level": "HIGH"}, {"level": "LOW"}],
        "confidence": "90%"
    }));

    assert_eq!(
        get_path(&output, "strategic_analysis.alignment_score"),
        Some(&json!(0.82))
    );
    assert_eq!(get_path(&output, "risks.0.level"), Some(&json!("HIGH")));
    assert_eq!(get_bool(&output, "success"), Some(true));
    assert_eq!(as_f64(output.get("confidence").unwrap()), Some(90.0));
}

// ---------------------------------------------------------------------------
// 2. Merging shared context is last-writer-wins per key
// ---------------------------------------------------------------------------

#[test]
fn shared_context_merge() {
    let mut shared = Payload::new();
    merge(&mut shared, &payload(json!({"market": {"size": 10}})));
    merge(&mut shared, &payload(json!({"market": {"size": 12}, "ux": {}})));
    assert_eq!(get_path(&shared, "market.size"), Some(&json!(12)));
    assert!(shared.contains_key("ux"));
}

// ---------------------------------------------------------------------------
// 3. Error Display
// ---------------------------------------------------------------------------

#[test]
fn error_display() {
    let id = Uuid::new_v4();
    assert_eq!(
        QuorumError::TaskNotFound(id).to_string(),
        format!("Task not found: {id}")
    );
    assert_eq!(
        QuorumError::NoAgentAvailable("risk_assessor".into()).to_string(),
        "No agent available: risk_assessor"
    );
    let io: QuorumError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(io.to_string().starts_with("IO error"));
}
