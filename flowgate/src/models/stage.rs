//! Pipeline stage model

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::pipeline::commands::normalize_commands;

pub const MAX_STAGE_NAME_LEN: usize = 255;
pub const MIN_STAGE_TIMEOUT_SECS: u32 = 10;
pub const MAX_STAGE_TIMEOUT_SECS: u32 = 3600;
pub const DEFAULT_STAGE_TIMEOUT_SECS: u32 = 300;

/// Pipeline phase, executed in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PreDeploy,
    Deploy,
    PostDeploy,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::PreDeploy, Phase::Deploy, Phase::PostDeploy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PreDeploy => "pre_deploy",
            Phase::Deploy => "deploy",
            Phase::PostDeploy => "post_deploy",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre_deploy" => Ok(Phase::PreDeploy),
            "deploy" => Ok(Phase::Deploy),
            "post_deploy" => Ok(Phase::PostDeploy),
            other => Err(OrchestratorError::ValidationError(format!(
                "Unknown phase '{}', expected pre_deploy, deploy or post_deploy",
                other
            ))),
        }
    }
}

/// A stored pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStage {
    pub id: String,
    pub project_id: String,
    pub phase: Phase,
    pub name: String,

    /// Zero-based, contiguous within {project, phase}
    pub position: u32,

    pub commands: Vec<String>,
    pub timeout_seconds: u32,
    pub continue_on_failure: bool,
    pub env: BTreeMap<String, String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Authoring input for a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,

    pub commands: Vec<String>,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,

    #[serde(default)]
    pub continue_on_failure: bool,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_timeout() -> u32 {
    DEFAULT_STAGE_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl StageDefinition {
    /// Build a definition from raw multi-line command input
    pub fn new(name: impl Into<String>, raw_commands: &str) -> Self {
        Self {
            name: name.into(),
            commands: normalize_commands(raw_commands),
            timeout_seconds: DEFAULT_STAGE_TIMEOUT_SECS,
            continue_on_failure: false,
            env: BTreeMap::new(),
            enabled: true,
        }
    }

    pub fn timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn continue_on_failure(mut self, value: bool) -> Self {
        self.continue_on_failure = value;
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn enabled(mut self, value: bool) -> Self {
        self.enabled = value;
        self
    }

    /// Validate and return the cleaned-up definition
    pub fn validated(mut self) -> Result<Self, OrchestratorError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(OrchestratorError::ValidationError(
                "Stage name is required".to_string(),
            ));
        }
        if name.chars().count() > MAX_STAGE_NAME_LEN {
            return Err(OrchestratorError::ValidationError(format!(
                "Stage name must not exceed {} characters",
                MAX_STAGE_NAME_LEN
            )));
        }
        self.name = name.to_string();

        self.commands = normalize_commands(&self.commands.join("\n"));
        if self.commands.is_empty() {
            return Err(OrchestratorError::ValidationError(
                "Stage needs at least one command".to_string(),
            ));
        }

        if !(MIN_STAGE_TIMEOUT_SECS..=MAX_STAGE_TIMEOUT_SECS).contains(&self.timeout_seconds) {
            return Err(OrchestratorError::ValidationError(format!(
                "Stage timeout must be between {} and {} seconds, got {}",
                MIN_STAGE_TIMEOUT_SECS, MAX_STAGE_TIMEOUT_SECS, self.timeout_seconds
            )));
        }

        if self.env.keys().any(|k| k.trim().is_empty()) {
            return Err(OrchestratorError::ValidationError(
                "Environment variable names must not be empty".to_string(),
            ));
        }

        Ok(self)
    }
}
