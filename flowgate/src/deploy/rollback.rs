//! Rollback selector

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::deploy::lifecycle::DeploymentService;
use crate::errors::OrchestratorError;
use crate::models::{Deployment, DeploymentRequest, DeploymentStatus, TriggerSource};
use crate::notify::emitter::emit_quietly;
use crate::notify::{EventName, NotificationEmitter, NotificationEvent};
use crate::storage::DeploymentStore;

/// Shown as the deployer of system-triggered deployments
pub const SYSTEM_ACTOR: &str = "System";

/// A prior successful deployment that can be replayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPoint {
    pub deployment_id: String,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    pub branch: String,
    pub deployed_at: DateTime<Utc>,
    pub deployed_by: String,

    /// The project's most recent successful deployment
    pub is_current: bool,

    pub can_rollback: bool,
}

#[derive(Clone)]
pub struct RollbackSelector {
    deployments: Arc<dyn DeploymentStore>,
    service: DeploymentService,
    notifier: Arc<dyn NotificationEmitter>,
    default_limit: usize,
}

impl RollbackSelector {
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        service: DeploymentService,
        notifier: Arc<dyn NotificationEmitter>,
        default_limit: usize,
    ) -> Self {
        Self {
            deployments,
            service,
            notifier,
            default_limit,
        }
    }

    /// Rollback points of a project, newest first
    pub fn list_rollback_points(
        &self,
        project_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<RollbackPoint>, OrchestratorError> {
        let limit = limit.unwrap_or(self.default_limit);
        let history = self.deployments.project_deployments(project_id)?;
        Ok(rollback_points(&history).into_iter().take(limit).collect())
    }

    /// Start a new deployment replaying `deployment_id`.
    ///
    /// The new deployment goes through approval gating like any request.
    pub fn rollback_to(
        &self,
        deployment_id: &str,
        actor: Option<&str>,
    ) -> Result<Deployment, OrchestratorError> {
        let target = self
            .deployments
            .deployment(deployment_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("Deployment {}", deployment_id)))?;
        check_eligible(&target, &self.deployments.project_deployments(&target.project_id)?)?;

        let described = target
            .commit_message
            .clone()
            .or_else(|| target.commit_hash.clone())
            .unwrap_or_default();
        let request = DeploymentRequest {
            project_id: target.project_id.clone(),
            server_id: Some(target.server_id.clone()),
            user_id: actor.map(str::to_string),
            commit_hash: target.commit_hash.clone(),
            commit_message: Some(format!("Rollback to: {}", described)),
            branch: target.branch.clone(),
            triggered_by: TriggerSource::Rollback,
            rollback_source_id: Some(target.id.clone()),
        };

        let deployment = self.service.request_deployment(request)?;
        info!(
            "Deployment {} rolls back to {} ({})",
            deployment.id,
            target.id,
            target.commit_hash.as_deref().unwrap_or("no commit")
        );

        let event = NotificationEvent::new(
            EventName::RollbackRequested,
            &deployment.id,
            &deployment.project_id,
            deployment.status.as_str(),
        )
        .with_actor(actor.unwrap_or(SYSTEM_ACTOR))
        .with_data(serde_json::json!({
            "rollback_source_id": target.id,
            "commit_hash": target.commit_hash,
        }));
        emit_quietly(self.notifier.as_ref(), event);

        Ok(deployment)
    }
}

/// Build rollback points from a newest-first history
fn rollback_points(history: &[Deployment]) -> Vec<RollbackPoint> {
    let current = current_deployment(history).map(|d| d.id.as_str());

    history
        .iter()
        .filter(|d| d.status == DeploymentStatus::Success)
        .filter(|d| d.triggered_by != TriggerSource::Rollback)
        .map(|d| {
            let is_current = current == Some(d.id.as_str());
            RollbackPoint {
                deployment_id: d.id.clone(),
                commit_hash: d.commit_hash.clone(),
                commit_message: d.commit_message.clone(),
                branch: d.branch.clone(),
                deployed_at: d.finished_at.unwrap_or(d.created_at),
                deployed_by: d.user_id.clone().unwrap_or_else(|| SYSTEM_ACTOR.to_string()),
                is_current,
                can_rollback: !is_current && d.commit_hash.is_some(),
            }
        })
        .collect()
}

/// Most recent successful deployment, whatever triggered it
fn current_deployment(history: &[Deployment]) -> Option<&Deployment> {
    history
        .iter()
        .find(|d| d.status == DeploymentStatus::Success)
}

fn check_eligible(target: &Deployment, history: &[Deployment]) -> Result<(), OrchestratorError> {
    if target.status != DeploymentStatus::Success {
        return Err(OrchestratorError::NotEligibleError(format!(
            "Deployment {} is {}, only successful deployments can be rolled back to",
            target.id, target.status
        )));
    }
    if target.triggered_by == TriggerSource::Rollback {
        return Err(OrchestratorError::NotEligibleError(format!(
            "Deployment {} is itself a rollback",
            target.id
        )));
    }

    let point = rollback_points(history)
        .into_iter()
        .find(|p| p.deployment_id == target.id);
    match point {
        Some(p) if p.can_rollback => Ok(()),
        Some(p) if p.is_current => Err(OrchestratorError::NotEligibleError(format!(
            "Deployment {} is the current deployment",
            target.id
        ))),
        _ => Err(OrchestratorError::NotEligibleError(format!(
            "Deployment {} has no commit to roll back to",
            target.id
        ))),
    }
}
