//! `quorum` command-line front end.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use quorum_core::Payload;
use quorum_orchestrator::gate::{self, AgentOutputs};
use quorum_orchestrator::{
    AgentType, Coordinator, CoordinatorConfig, ScriptedHandler, StaticProbe, WorkflowState,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quorum", about = "Quorum: multi-agent task orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "quorum.toml")]
    config: PathBuf,

    /// JSON file with extra workflow templates
    #[arg(long, global = true)]
    templates: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover the installed agents and list them by type
    Agents,
    /// List the registered workflow templates
    Templates,
    /// Evaluate quality gates against a JSON file of agent outputs
    CheckGate {
        /// Gate expressions, e.g. "feasibility_score >= 0.6"
        #[arg(required = true)]
        gates: Vec<String>,
        /// JSON object mapping agent id to its output payload
        #[arg(short, long)]
        outputs: PathBuf,
    },
    /// Run a workflow template against scripted agent responses
    Run {
        /// Template id
        template: String,
        /// JSON object used as the workflow input
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// JSON object mapping agent type (or "*") to its canned response
        #[arg(short, long)]
        responses: Option<PathBuf>,
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 3600)]
        timeout: u64,
    },
}

#[derive(Debug, Default, Deserialize)]
struct QuorumConfig {
    #[serde(default)]
    coordinator: CoordinatorConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct LoggingConfig {
    #[serde(default)]
    format: LogFormat,
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    level: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl QuorumConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config: QuorumConfig = toml::from_str(&raw)
            .with_context(|| format!("Invalid config file '{}'", path.display()))?;
        config.coordinator.validate()?;
        Ok(config)
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = QuorumConfig::load(&cli.config)?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Agents => list_agents(config.coordinator),
        Commands::Templates => list_templates(config.coordinator, cli.templates.as_deref()),
        Commands::CheckGate { gates, outputs } => check_gates(&gates, &outputs),
        Commands::Run {
            template,
            input,
            responses,
            timeout,
        } => {
            run_workflow(
                config.coordinator,
                cli.templates.as_deref(),
                &template,
                input.as_deref(),
                responses.as_deref(),
                Duration::from_secs(timeout),
            )
            .await
        }
    }
}

fn list_agents(config: CoordinatorConfig) -> anyhow::Result<()> {
    let coordinator = Coordinator::new(config, Arc::new(ScriptedHandler::new()))?;
    let found = coordinator.discover_agents(&StaticProbe::all());
    info!(types = found.len(), "Agent discovery finished");

    for (agent_type, agents) in coordinator.registry().by_type() {
        println!("{agent_type}");
        for agent in agents {
            let capabilities: Vec<&str> =
                agent.capabilities.iter().map(|c| c.name.as_str()).collect();
            println!("  {} [{}]", agent.id, capabilities.join(", "));
        }
    }
    Ok(())
}

fn list_templates(config: CoordinatorConfig, extra: Option<&Path>) -> anyhow::Result<()> {
    let coordinator = Coordinator::new(config, Arc::new(ScriptedHandler::new()))?;
    register_extra_templates(&coordinator, extra)?;
    for template in coordinator.templates() {
        println!("{}: {}", template.id, template.name);
        for (n, step) in template.steps.iter().enumerate() {
            println!("  {}. {} ({})", n + 1, step.action, step.agent_type);
        }
        println!("  criteria: {}", template.success_criteria.join("; "));
    }
    Ok(())
}

fn check_gates(gates: &[String], outputs_path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(outputs_path)
        .with_context(|| format!("Failed to read outputs '{}'", outputs_path.display()))?;
    let outputs: AgentOutputs = serde_json::from_str(&raw)
        .with_context(|| format!("'{}' is not an object of payloads", outputs_path.display()))?;

    let report = gate::evaluate_all(gates, &outputs);
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.passed {
        bail!("failed gates: {}", report.failed_gates().join(", "));
    }
    Ok(())
}

async fn run_workflow(
    config: CoordinatorConfig,
    extra_templates: Option<&Path>,
    template_id: &str,
    input: Option<&Path>,
    responses: Option<&Path>,
    wait_limit: Duration,
) -> anyhow::Result<()> {
    let input = match input {
        Some(path) => read_payload(path)?,
        None => Payload::new(),
    };
    let handler = match responses {
        Some(path) => scripted_handler(&read_payload(path)?)?,
        None => ScriptedHandler::succeed_all(),
    };

    let poll = config.poll_interval();
    let coordinator = Coordinator::new(config, Arc::new(handler))?;
    register_extra_templates(&coordinator, extra_templates)?;
    coordinator.discover_agents(&StaticProbe::all());
    coordinator.start();

    let workflow_id = coordinator.execute_workflow(template_id, input, Payload::new())?;
    let waited = tokio::time::timeout(wait_limit, async {
        loop {
            let status = coordinator.workflow_status(workflow_id)?;
            if status.state != WorkflowState::Running {
                return anyhow::Ok(status);
            }
            tokio::time::sleep(poll).await;
        }
    })
    .await;
    coordinator.shutdown().await;

    let status = match waited {
        Ok(status) => status?,
        Err(_) => {
            warn!(workflow_id = %workflow_id, "Workflow still running at wait limit");
            bail!("workflow {workflow_id} did not finish within {wait_limit:?}");
        }
    };

    if let Some(run) = coordinator.workflow(workflow_id) {
        for task_id in run.task_ids {
            if let Some(result) = coordinator.result_for(task_id) {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
    }
    println!("{}", serde_json::to_string_pretty(&status)?);

    if status.state == WorkflowState::Failed {
        bail!("workflow {workflow_id} failed");
    }
    Ok(())
}

fn register_extra_templates(coordinator: &Coordinator, path: Option<&Path>) -> anyhow::Result<()> {
    if let Some(path) = path {
        let count = coordinator
            .register_templates_from(path)
            .with_context(|| format!("Failed to load templates from '{}'", path.display()))?;
        info!(count, path = %path.display(), "Workflow templates loaded");
    }
    Ok(())
}

fn read_payload(path: &Path) -> anyhow::Result<Payload> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("'{}' is not a JSON object", path.display()))
}

/// Build a handler from `{"<agent type>": {...}, "*": {...}}`.
fn scripted_handler(responses: &Payload) -> anyhow::Result<ScriptedHandler> {
    let mut handler = ScriptedHandler::new();
    for (key, value) in responses {
        let Some(payload) = value.as_object() else {
            bail!("response for '{key}' must be a JSON object");
        };
        handler = if key == "*" {
            handler.with_fallback(payload.clone())
        } else {
            let agent_type: AgentType = key.parse().map_err(anyhow::Error::msg)?;
            handler.with_response(agent_type, payload.clone())
        };
    }
    Ok(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_orchestrator::CapabilityHandler;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_missing_config_uses_defaults() {
        let config = QuorumConfig::load(Path::new("/nonexistent/quorum.toml")).unwrap();
        assert_eq!(config.coordinator, CoordinatorConfig::default());
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_file_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[coordinator]\nmax_concurrency = 2\n\n[logging]\nformat = \"pretty\"\nlevel = \"debug\""
        )
        .unwrap();
        let config = QuorumConfig::load(file.path()).unwrap();
        assert_eq!(config.coordinator.max_concurrency, 2);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_coordinator_config_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[coordinator]\nmax_concurrency = 0").unwrap();
        assert!(QuorumConfig::load(file.path()).is_err());
    }

    #[tokio::test]
    async fn test_scripted_handler_from_responses() {
        let responses = json!({
            "risk_assessor": {"success": true, "critical_risks": []},
            "*": {"success": false}
        });
        let handler = scripted_handler(responses.as_object().unwrap()).unwrap();

        let risk = handler
            .invoke(AgentType::RiskAssessor, Payload::new())
            .await
            .unwrap();
        assert!(risk.contains_key("critical_risks"));
        let other = handler
            .invoke(AgentType::DataAnalyst, Payload::new())
            .await
            .unwrap();
        assert_eq!(other["success"], json!(false));
    }

    #[test]
    fn test_extra_templates_registered() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": "quick_risk", "name": "Quick Risk", "description": "",
                "steps": [{{"agent_type": "risk_assessor", "action": "assess", "task_type": "risk_assessment"}}],
                "success_criteria": ["not a gate"]}}]"#
        )
        .unwrap();
        let coordinator =
            Coordinator::new(CoordinatorConfig::default(), Arc::new(ScriptedHandler::new())).unwrap();
        assert!(register_extra_templates(&coordinator, Some(file.path())).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": "quick_risk", "name": "Quick Risk", "description": "",
                "steps": [{{"agent_type": "risk_assessor", "action": "assess", "task_type": "risk_assessment"}}],
                "success_criteria": ["no_critical_risks_identified"]}}]"#
        )
        .unwrap();
        register_extra_templates(&coordinator, Some(file.path())).unwrap();
        assert!(coordinator.templates().iter().any(|t| t.id == "quick_risk"));
        register_extra_templates(&coordinator, None).unwrap();
    }

    #[test]
    fn test_unknown_agent_type_in_responses() {
        let responses = json!({"oracle": {"success": true}});
        assert!(scripted_handler(responses.as_object().unwrap()).is_err());
    }
}
