//! Deployment models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::stage::Phase;

/// Deployment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Queued, not yet gated
    Pending,

    /// Waiting for an approver
    PendingApproval,

    /// Cleared to execute; phases run on a worker
    Running,

    Success,
    Failed,
    Cancelled,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Success | DeploymentStatus::Failed | DeploymentStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::PendingApproval => "pending_approval",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    #[default]
    Manual,
    Webhook,
    Scheduled,
    Rollback,
}

/// Outcome of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRunStatus {
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

impl StageRunStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, StageRunStatus::Failed | StageRunStatus::TimedOut)
    }
}

/// Recorded result of one stage run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: String,
    pub name: String,
    pub status: StageRunStatus,
    pub continue_on_failure: bool,

    /// Exit code of the last command that ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    pub output: String,
    pub duration_ms: u64,
}

/// Recorded result of one phase run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,

    /// False when a stage without continue-on-failure failed
    pub succeeded: bool,

    /// The deployment was cancelled before the phase finished
    #[serde(default)]
    pub cancelled: bool,

    pub stages: Vec<StageResult>,
}

impl PhaseResult {
    /// The first stage whose failure stopped the phase
    pub fn blocking_failure(&self) -> Option<&StageResult> {
        self.stages
            .iter()
            .find(|s| s.status.is_failure() && !s.continue_on_failure)
    }
}

/// A deployment record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub project_id: String,
    pub server_id: String,

    /// Triggering user; `None` for system-initiated runs
    pub user_id: Option<String>,

    pub status: DeploymentStatus,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    pub branch: String,
    pub triggered_by: TriggerSource,

    /// Deployment this one rolls back to
    pub rollback_source_id: Option<String>,

    pub error_message: Option<String>,

    #[serde(default)]
    pub phase_results: Vec<PhaseResult>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Input for a new deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub project_id: String,

    /// Falls back to the project's server
    #[serde(default)]
    pub server_id: Option<String>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub commit_hash: Option<String>,

    #[serde(default)]
    pub commit_message: Option<String>,

    pub branch: String,

    #[serde(default)]
    pub triggered_by: TriggerSource,

    #[serde(default)]
    pub rollback_source_id: Option<String>,
}

impl DeploymentRequest {
    pub fn new(project_id: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            branch: branch.into(),
            ..Default::default()
        }
    }

    pub fn by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn commit(mut self, hash: impl Into<String>, message: impl Into<String>) -> Self {
        self.commit_hash = Some(hash.into());
        self.commit_message = Some(message.into());
        self
    }

    pub fn on_server(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    pub fn triggered_by(mut self, source: TriggerSource) -> Self {
        self.triggered_by = source;
        self
    }
}
