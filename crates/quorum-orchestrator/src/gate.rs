//! Quality gates: a tiny expression language evaluated over agent outputs.
//!
//! A gate is either a comparison `<metric> <op> <threshold>` with
//! `op ∈ {>, >=, =}`, or one of the named boolean predicates in
//! [`PREDICATES`]. Thresholds may be plain numbers, percentages (`"10%"` is
//! compared as `10`), or literal strings (equality only).
//!
//! Operators are located by plain substring search, `>=` first, then `>`,
//! then `=`. A metric name that itself contains one of those characters is
//! split at the first match.

use quorum_core::payload::{as_f64, get_bool, get_path};
use quorum_core::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Output payloads keyed by agent id.
pub type AgentOutputs = BTreeMap<String, Payload>;

const COMPARISON_WEIGHT: f64 = 0.95;
const EQUALITY_WEIGHT: f64 = 1.0;
const PREDICATE_WEIGHT: f64 = 0.9;
const EPSILON: f64 = 1e-9;

/// Human metric names mapped to the dotted path agents report them under.
const METRIC_ALIASES: &[(&str, &str)] = &[
    ("strategic_alignment_score", "strategic_analysis.alignment_score"),
    ("market_opportunity_score", "market_analysis.opportunity_score"),
    ("feasibility_score", "technical_assessment.feasibility_score"),
    ("api_quality_score", "api_quality.overall_score"),
    ("risk_score", "risk_assessment.overall_score"),
    ("usability_score", "user_insights_summary.usability_score"),
    ("statistical_confidence", "data_insights.confidence"),
    ("framework_coverage", "frameworks_applied"),
    ("insight_count", "user_insights"),
];

type PredicateFn = fn(&AgentOutputs) -> bool;

/// Named boolean predicates.
pub const PREDICATES: &[(&str, PredicateFn)] = &[
    ("all_agents_complete_successfully", all_agents_complete_successfully),
    ("no_critical_risks_identified", no_critical_risks_identified),
    ("no_blocking_issues", no_blocking_issues),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOp {
    Gt,
    Ge,
    Eq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Threshold {
    Number(f64),
    /// A `%`-suffixed number, already stripped of the sign.
    Percent(f64),
    Text(String),
}

impl Threshold {
    fn as_number(&self) -> Option<f64> {
        match self {
            Threshold::Number(n) | Threshold::Percent(n) => Some(*n),
            Threshold::Text(_) => None,
        }
    }
}

/// Parsed gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateExpr {
    Comparison {
        metric: String,
        op: GateOp,
        threshold: Threshold,
    },
    Predicate(String),
}

impl GateExpr {
    fn weight(&self) -> f64 {
        match self {
            GateExpr::Comparison { op: GateOp::Eq, .. } => EQUALITY_WEIGHT,
            GateExpr::Comparison { .. } => COMPARISON_WEIGHT,
            GateExpr::Predicate(_) => PREDICATE_WEIGHT,
        }
    }
}

/// Outcome of a single gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub expression: String,
    pub passed: bool,
    /// Observed metric value, or 1.0/0.0 for predicates.
    pub score: Option<f64>,
    pub confidence: f64,
    pub detail: String,
}

/// Aggregate of all gates for one task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateReport {
    pub passed: bool,
    pub confidence: f64,
    pub results: Vec<GateResult>,
}

impl GateReport {
    pub fn failed_gates(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.expression.clone())
            .collect()
    }

    pub fn scores(&self) -> BTreeMap<String, f64> {
        self.results
            .iter()
            .filter_map(|r| r.score.map(|s| (r.expression.clone(), s)))
            .collect()
    }
}

/// Parse a gate expression.
pub fn parse(expression: &str) -> Result<GateExpr, String> {
    let expr = expression.trim();
    if expr.is_empty() {
        return Err("empty gate expression".to_string());
    }
    if PREDICATES.iter().any(|(name, _)| *name == expr) {
        return Ok(GateExpr::Predicate(expr.to_string()));
    }

    let (metric, op, raw) = if let Some((m, t)) = expr.split_once(">=") {
        (m, GateOp::Ge, t)
    } else if let Some((m, t)) = expr.split_once('>') {
        (m, GateOp::Gt, t)
    } else if let Some((m, t)) = expr.split_once('=') {
        (m, GateOp::Eq, t)
    } else {
        return Err(format!("unknown predicate or missing operator in '{expr}'"));
    };

    let metric = metric.trim();
    let raw = raw.trim();
    if metric.is_empty() || raw.is_empty() {
        return Err(format!("incomplete comparison '{expr}'"));
    }

    let threshold = parse_threshold(raw);
    if op != GateOp::Eq && threshold.as_number().is_none() {
        return Err(format!("non-numeric threshold '{raw}' for ordered comparison"));
    }

    Ok(GateExpr::Comparison {
        metric: metric.to_string(),
        op,
        threshold,
    })
}

fn parse_threshold(raw: &str) -> Threshold {
    if let Some(stripped) = raw.strip_suffix('%') {
        if let Ok(n) = stripped.trim().parse::<f64>() {
            return Threshold::Percent(n);
        }
    }
    if let Ok(n) = raw.parse::<f64>() {
        return Threshold::Number(n);
    }
    Threshold::Text(raw.trim_matches(|c| c == '"' || c == '\'').to_string())
}

/// Find a metric in any agent's output: direct key (or dotted path) first,
/// then the alias table.
pub fn resolve_metric<'a>(metric: &str, outputs: &'a AgentOutputs) -> Option<&'a Value> {
    let direct = outputs.values().find_map(|o| get_path(o, metric));
    if direct.is_some() {
        return direct;
    }
    let (_, path) = METRIC_ALIASES.iter().find(|(name, _)| *name == metric)?;
    outputs.values().find_map(|o| get_path(o, path))
}

/// Numeric view of a resolved value. Lists count their entries.
fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Array(items) => Some(items.len() as f64),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        other => as_f64(other),
    }
}

fn text_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluate one gate expression.
pub fn evaluate_gate(expression: &str, outputs: &AgentOutputs) -> GateResult {
    let parsed = match parse(expression) {
        Ok(p) => p,
        Err(detail) => {
            return GateResult {
                expression: expression.to_string(),
                passed: false,
                score: None,
                confidence: 0.0,
                detail,
            }
        }
    };
    let confidence = parsed.weight();

    match &parsed {
        GateExpr::Predicate(name) => {
            let passed = PREDICATES
                .iter()
                .find(|(n, _)| *n == name.as_str())
                .is_some_and(|(_, check)| check(outputs));
            GateResult {
                expression: expression.to_string(),
                passed,
                score: Some(if passed { 1.0 } else { 0.0 }),
                confidence,
                detail: format!("{name}: {}", if passed { "satisfied" } else { "violated" }),
            }
        }
        GateExpr::Comparison {
            metric,
            op,
            threshold,
        } => {
            let Some(value) = resolve_metric(metric, outputs) else {
                return GateResult {
                    expression: expression.to_string(),
                    passed: false,
                    score: None,
                    confidence,
                    detail: format!("metric '{metric}' not found in any agent output"),
                };
            };
            let (passed, score) = compare(value, *op, threshold);
            GateResult {
                expression: expression.to_string(),
                passed,
                score,
                confidence,
                detail: format!("{metric} = {}", text_value(value)),
            }
        }
    }
}

fn compare(value: &Value, op: GateOp, threshold: &Threshold) -> (bool, Option<f64>) {
    let actual = numeric_value(value);
    match (op, threshold.as_number()) {
        (GateOp::Gt, Some(t)) => (actual.is_some_and(|a| a > t), actual),
        (GateOp::Ge, Some(t)) => (actual.is_some_and(|a| a >= t), actual),
        (GateOp::Eq, Some(t)) => match actual {
            Some(a) => ((a - t).abs() < EPSILON, Some(a)),
            None => (false, None),
        },
        (GateOp::Eq, None) => {
            let expected = match threshold {
                Threshold::Text(t) => t.as_str(),
                _ => "",
            };
            let passed = text_value(value).eq_ignore_ascii_case(expected);
            (passed, Some(if passed { 1.0 } else { 0.0 }))
        }
        // Rejected by `parse`.
        (_, None) => (false, None),
    }
}

/// Evaluate every distinct gate once, in first-seen order. Overall pass is the
/// AND of all gates; overall confidence is the product of the per-gate weights.
pub fn evaluate_all(gates: &[String], outputs: &AgentOutputs) -> GateReport {
    let mut results: Vec<GateResult> = Vec::with_capacity(gates.len());
    for gate in gates {
        if !results.iter().any(|r| r.expression == *gate) {
            results.push(evaluate_gate(gate, outputs));
        }
    }
    GateReport {
        passed: results.iter().all(|r| r.passed),
        confidence: results.iter().map(|r| r.confidence).product(),
        results,
    }
}

fn all_agents_complete_successfully(outputs: &AgentOutputs) -> bool {
    !outputs.is_empty() && outputs.values().all(|o| get_bool(o, "success") == Some(true))
}

fn no_critical_risks_identified(outputs: &AgentOutputs) -> bool {
    !outputs.values().any(|o| {
        o.get("risks")
            .and_then(Value::as_array)
            .is_some_and(|risks| {
                risks.iter().any(|r| {
                    r.get("level")
                        .and_then(Value::as_str)
                        .is_some_and(|l| l.eq_ignore_ascii_case("critical"))
                })
            })
    })
}

fn no_blocking_issues(outputs: &AgentOutputs) -> bool {
    !outputs.values().any(|o| get_bool(o, "success") == Some(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs(entries: &[(&str, Value)]) -> AgentOutputs {
        entries
            .iter()
            .map(|(id, v)| ((*id).to_string(), v.as_object().cloned().unwrap()))
            .collect()
    }

    #[test]
    fn test_parse_comparison() {
        assert_eq!(
            parse("x >= 5").unwrap(),
            GateExpr::Comparison {
                metric: "x".into(),
                op: GateOp::Ge,
                threshold: Threshold::Number(5.0),
            }
        );
        assert_eq!(
            parse("y = 10%").unwrap(),
            GateExpr::Comparison {
                metric: "y".into(),
                op: GateOp::Eq,
                threshold: Threshold::Percent(10.0),
            }
        );
        assert_eq!(
            parse("no_blocking_issues").unwrap(),
            GateExpr::Predicate("no_blocking_issues".into())
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("just_words").is_err());
        assert!(parse("x > high").is_err());
        assert!(parse("> 3").is_err());
    }

    #[test]
    fn test_greater_than() {
        let six = outputs(&[("a", json!({"x": 6}))]);
        let five = outputs(&[("a", json!({"x": 5}))]);
        assert!(evaluate_gate("x > 5", &six).passed);
        assert!(!evaluate_gate("x > 5", &five).passed);
        assert!(evaluate_gate("x >= 5", &five).passed);
    }

    #[test]
    fn test_percent_equality() {
        let o = outputs(&[("a", json!({"y": 10}))]);
        let r = evaluate_gate("y = 10%", &o);
        assert!(r.passed);
        assert_eq!(r.score, Some(10.0));
    }

    #[test]
    fn test_text_equality() {
        let o = outputs(&[("a", json!({"verdict": "GO"}))]);
        assert!(evaluate_gate("verdict = go", &o).passed);
        assert!(!evaluate_gate("verdict = no_go", &o).passed);
    }

    #[test]
    fn test_alias_and_list_cardinality() {
        let o = outputs(&[
            (
                "strategist",
                json!({"strategic_analysis": {"alignment_score": 0.82}}),
            ),
            (
                "prioritizer",
                json!({"frameworks_applied": ["rice", "kano", "moscow"]}),
            ),
        ]);
        assert!(evaluate_gate("strategic_alignment_score >= 0.7", &o).passed);
        let coverage = evaluate_gate("framework_coverage >= 3", &o);
        assert!(coverage.passed);
        assert_eq!(coverage.score, Some(3.0));
    }

    #[test]
    fn test_missing_metric_fails() {
        let o = outputs(&[("a", json!({"x": 1}))]);
        let r = evaluate_gate("unknown_metric > 0", &o);
        assert!(!r.passed);
        assert!(r.detail.contains("not found"));
    }

    #[test]
    fn test_all_agents_complete_successfully() {
        let ok = outputs(&[
            ("a", json!({"success": true, "x": 9})),
            ("b", json!({"success": true})),
        ]);
        let one_failed = outputs(&[
            ("a", json!({"success": true, "x": 9})),
            ("b", json!({"success": false})),
        ]);
        assert!(evaluate_gate("all_agents_complete_successfully", &ok).passed);

        let report = evaluate_all(
            &["x > 5".to_string(), "all_agents_complete_successfully".to_string()],
            &one_failed,
        );
        assert!(report.results[0].passed);
        assert!(!report.passed);
        assert_eq!(report.failed_gates(), vec!["all_agents_complete_successfully"]);
    }

    #[test]
    fn test_critical_risks() {
        let risky = outputs(&[(
            "r",
            json!({"risks": [{"level": "LOW"}, {"level": "CRITICAL"}]}),
        )]);
        let calm = outputs(&[("r", json!({"risks": [{"level": "HIGH"}]}))]);
        assert!(!evaluate_gate("no_critical_risks_identified", &risky).passed);
        assert!(evaluate_gate("no_critical_risks_identified", &calm).passed);
    }

    #[test]
    fn test_no_blocking_issues_ignores_missing_success() {
        let o = outputs(&[("a", json!({"x": 1}))]);
        assert!(evaluate_gate("no_blocking_issues", &o).passed);
        assert!(!evaluate_gate("all_agents_complete_successfully", &o).passed);
    }

    #[test]
    fn test_confidence_compounds() {
        let o = outputs(&[("a", json!({"x": 6, "success": true}))]);
        let one = evaluate_all(&["x > 5".to_string()], &o);
        let two = evaluate_all(
            &["x > 5".to_string(), "no_blocking_issues".to_string()],
            &o,
        );
        assert!((one.confidence - 0.95).abs() < 1e-9);
        assert!((two.confidence - 0.95 * 0.9).abs() < 1e-9);
        assert!(evaluate_all(&[], &o).passed);
        assert_eq!(evaluate_all(&[], &o).confidence, 1.0);
    }

    #[test]
    fn test_repeated_gate_counted_once() {
        let o = outputs(&[("a", json!({"x": 6, "y": 2}))]);
        let gates = vec!["x > 5".to_string(), "y > 1".to_string(), "x > 5".to_string()];
        let report = evaluate_all(&gates, &o);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.scores().len(), report.results.len());
        assert!((report.confidence - 0.95 * 0.95).abs() < 1e-9);
        let expressions: Vec<&str> = report.results.iter().map(|r| r.expression.as_str()).collect();
        assert_eq!(expressions, vec!["x > 5", "y > 1"]);
    }
}
