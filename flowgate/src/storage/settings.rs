//! Settings file management

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::OrchestratorError;
use crate::logs::LogLevel;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Maximum rollback points listed per project
    #[serde(default = "default_rollback_point_limit")]
    pub rollback_point_limit: usize,

    /// Allow at most one gated or running deployment per project
    #[serde(default)]
    pub single_active_deployment: bool,

    /// Deployer worker configuration
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Command runner configuration
    #[serde(default)]
    pub runner: RunnerSettings,
}

fn default_rollback_point_limit() -> usize {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            rollback_point_limit: default_rollback_point_limit(),
            single_active_deployment: false,
            worker: WorkerSettings::default(),
            runner: RunnerSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings from a JSON file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        if !path.exists() {
            info!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.rollback_point_limit == 0 {
            return Err(OrchestratorError::ConfigError(
                "rollback_point_limit must be at least 1".to_string(),
            ));
        }
        if self.worker.max_concurrent_deployments == 0 {
            return Err(OrchestratorError::ConfigError(
                "worker.max_concurrent_deployments must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Deployer worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Deployments executing at the same time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_deployments: usize,
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_deployments: default_max_concurrent(),
        }
    }
}

/// Local command runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Shell used to run stage commands
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Directory commands run in
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            working_dir: default_working_dir(),
        }
    }
}
