//! Deployment approval model

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::DeploymentStatus;

pub const MAX_APPROVAL_NOTE_LEN: usize = 1000;

/// Approval status; anything but `Pending` is final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Approval record guarding one deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentApproval {
    pub id: String,
    pub deployment_id: String,
    pub project_id: String,
    pub status: ApprovalStatus,

    /// Who asked for the deployment; `None` for system requests
    pub requested_by: Option<String>,

    /// Set once, together with `responded_at`, when leaving `Pending`
    pub approved_by: Option<String>,

    pub notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,

    /// Request and response trail, oldest first
    #[serde(default)]
    pub audit: Vec<ApprovalAuditEntry>,
}

/// Gate action recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Requested,
    Approved,
    Rejected,
}

impl ApprovalAction {
    /// Action matching a final approval status
    pub fn for_outcome(status: ApprovalStatus) -> Option<Self> {
        match status {
            ApprovalStatus::Pending => None,
            ApprovalStatus::Approved => Some(ApprovalAction::Approved),
            ApprovalStatus::Rejected => Some(ApprovalAction::Rejected),
        }
    }
}

/// One gate action and the deployment transition it caused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalAuditEntry {
    pub action: ApprovalAction,
    pub actor: Option<String>,
    pub from_status: DeploymentStatus,
    pub to_status: DeploymentStatus,
    pub at: DateTime<Utc>,
}

impl ApprovalAuditEntry {
    pub fn new(
        action: ApprovalAction,
        actor: Option<String>,
        from_status: DeploymentStatus,
        to_status: DeploymentStatus,
    ) -> Self {
        Self {
            action,
            actor,
            from_status,
            to_status,
            at: Utc::now(),
        }
    }
}

/// Approval counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStats {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub total: usize,
}

impl ApprovalStats {
    pub fn record(&mut self, status: ApprovalStatus) {
        match status {
            ApprovalStatus::Pending => self.pending += 1,
            ApprovalStatus::Approved => self.approved += 1,
            ApprovalStatus::Rejected => self.rejected += 1,
        }
        self.total += 1;
    }
}
