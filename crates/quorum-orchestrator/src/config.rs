use crate::planner::CoordinationPattern;
use quorum_core::{QuorumError, QuorumResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Maximum coordinations running at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Agents at or above this load are not selected.
    #[serde(default = "default_load_threshold")]
    pub load_threshold: f64,
    /// Load added to an agent for the duration of one step.
    #[serde(default = "default_load_delta")]
    pub load_delta: f64,
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// Dispatcher sleep when the ready queue is empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long `shutdown()` waits for in-flight coordinations.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Number of recent results summarized by the system status.
    #[serde(default = "default_status_window")]
    pub status_window: usize,
    #[serde(default)]
    pub pattern: CoordinationPattern,
}

fn default_max_concurrency() -> usize {
    10
}
fn default_load_threshold() -> f64 {
    0.8
}
fn default_load_delta() -> f64 {
    0.1
}
fn default_step_timeout_secs() -> u64 {
    300
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_shutdown_timeout_secs() -> u64 {
    30
}
fn default_history_capacity() -> usize {
    1000
}
fn default_status_window() -> usize {
    50
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            load_threshold: default_load_threshold(),
            load_delta: default_load_delta(),
            step_timeout_secs: default_step_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            history_capacity: default_history_capacity(),
            status_window: default_status_window(),
            pattern: CoordinationPattern::default(),
        }
    }
}

/// Shape of a `quorum.toml` file.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    coordinator: CoordinatorConfig,
}

impl CoordinatorConfig {
    /// Parse the `[coordinator]` table of a TOML document. Missing keys take defaults.
    pub fn from_toml_str(s: &str) -> QuorumResult<Self> {
        let file: ConfigFile = toml::from_str(s)
            .map_err(|e| QuorumError::Configuration(format!("invalid config: {e}")))?;
        file.coordinator.validate()?;
        Ok(file.coordinator)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> QuorumResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> QuorumResult<()> {
        if self.max_concurrency == 0 {
            return Err(QuorumError::Configuration(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if !(self.load_threshold > 0.0 && self.load_threshold <= 1.0) {
            return Err(QuorumError::Configuration(format!(
                "load_threshold {} must be in (0, 1]",
                self.load_threshold
            )));
        }
        if !(self.load_delta > 0.0 && self.load_delta <= 1.0) {
            return Err(QuorumError::Configuration(format!(
                "load_delta {} must be in (0, 1]",
                self.load_delta
            )));
        }
        if self.step_timeout_secs == 0 || self.shutdown_timeout_secs == 0 {
            return Err(QuorumError::Configuration(
                "timeouts must be greater than zero".into(),
            ));
        }
        if self.history_capacity == 0 || self.status_window == 0 {
            return Err(QuorumError::Configuration(
                "history_capacity and status_window must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.load_threshold, 0.8);
        assert_eq!(config.step_timeout(), Duration::from_secs(300));
        assert_eq!(config.status_window, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = CoordinatorConfig::from_toml_str(
            "[coordinator]\nmax_concurrency = 4\npattern = \"pipeline\"\n",
        )
        .unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.pattern, CoordinationPattern::Pipeline);
        assert_eq!(config.history_capacity, 1000);
    }

    #[test]
    fn test_empty_document() {
        let config = CoordinatorConfig::from_toml_str("").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = CoordinatorConfig::from_toml_str("[coordinator]\nmax_concurrency = 0\n")
            .unwrap_err();
        assert!(matches!(err, QuorumError::Configuration(_)));
        assert!(CoordinatorConfig::from_toml_str("[coordinator]\nload_threshold = 1.5\n").is_err());
        assert!(CoordinatorConfig::from_toml_str("[coordinator\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[coordinator]\nstep_timeout_secs = 5").unwrap();
        let config = CoordinatorConfig::load(file.path()).unwrap();
        assert_eq!(config.step_timeout(), Duration::from_secs(5));

        let missing = CoordinatorConfig::load(Path::new("/nonexistent/quorum.toml"));
        assert!(matches!(missing, Err(QuorumError::Io(_))));
    }
}
