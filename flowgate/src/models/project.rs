//! Project model

use serde::{Deserialize, Serialize};

/// What a failing post_deploy phase does to an otherwise successful run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostDeployFailurePolicy {
    /// The deployment ends `failed`
    #[default]
    FailDeployment,

    /// The failure is recorded but the deployment still ends `success`
    Ignore,
}

/// Narrows which deployments of an approval-gated project need sign-off.
/// Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRules {
    #[serde(default)]
    pub environments: Vec<String>,

    #[serde(default)]
    pub branches: Vec<String>,
}

/// A deployable project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Unique project ID
    pub id: String,

    /// Display name
    pub name: String,

    /// Default target server
    #[serde(default)]
    pub server_id: Option<String>,

    /// Environment label (production, staging, ...)
    #[serde(default)]
    pub environment: Option<String>,

    /// Gate every deployment behind an approval
    #[serde(default)]
    pub requires_approval: bool,

    #[serde(default)]
    pub approval_rules: ApprovalRules,

    #[serde(default)]
    pub post_deploy_failure: PostDeployFailurePolicy,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            server_id: None,
            environment: None,
            requires_approval: false,
            approval_rules: ApprovalRules::default(),
            post_deploy_failure: PostDeployFailurePolicy::default(),
        }
    }

    /// Whether a deployment of `branch` must wait for an approval
    pub fn requires_approval_for(&self, branch: &str) -> bool {
        if !self.requires_approval {
            return false;
        }

        let rules = &self.approval_rules;
        if !rules.environments.is_empty() {
            let matches_env = self
                .environment
                .as_deref()
                .is_some_and(|env| rules.environments.iter().any(|e| e == env));
            if !matches_env {
                return false;
            }
        }

        if !rules.branches.is_empty() && !rules.branches.iter().any(|b| b == branch) {
            return false;
        }

        true
    }
}
