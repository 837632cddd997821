// Infrastructure: runtime configuration
// JSON file (optional) first, environment overrides second

use crate::application::{CircuitBreakerConfig, OrchestratorConfig};
use crate::domain::SolverBackend;
use crate::solver::RandomSearchConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_MAX_CONCURRENT_JOBS: &str = "NETPLAN_MAX_CONCURRENT_JOBS";
pub const ENV_JOB_TIMEOUT_SECS: &str = "NETPLAN_JOB_TIMEOUT_SECS";
pub const ENV_SOLVER: &str = "NETPLAN_SOLVER";
pub const ENV_LOG: &str = "NETPLAN_LOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub backend: SolverBackend,
    pub random_search: RandomSearchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub orchestrator: OrchestratorConfig,
    pub solver: SolverSettings,
    pub circuit_breaker: CircuitBreakerConfig,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            solver: SolverSettings::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, then `path` when given, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_CONCURRENT_JOBS) {
            self.orchestrator.max_concurrent_jobs = parse_number(ENV_MAX_CONCURRENT_JOBS, &value)?;
        }
        if let Some(value) = lookup(ENV_JOB_TIMEOUT_SECS) {
            self.orchestrator.job_timeout_secs = parse_number(ENV_JOB_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_SOLVER) {
            self.solver.backend = value.parse().map_err(|message| ConfigError::InvalidValue {
                key: ENV_SOLVER.to_string(),
                message,
            })?;
        }
        if let Some(value) = lookup(ENV_LOG) {
            self.log_filter = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };
        if self.orchestrator.max_concurrent_jobs == 0 {
            return Err(invalid("orchestrator.max_concurrent_jobs", "must be at least 1"));
        }
        if self.orchestrator.job_timeout_secs == 0 {
            return Err(invalid("orchestrator.job_timeout_secs", "must be positive"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(invalid("circuit_breaker.failure_threshold", "must be at least 1"));
        }
        if self.solver.random_search.trials == 0 {
            return Err(invalid("solver.random_search.trials", "must be at least 1"));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}
