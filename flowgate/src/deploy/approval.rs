//! Approval gate
//!
//! Parks gated deployments in `pending_approval` until an authorized actor
//! approves or rejects them. The approval's move away from `pending` is a
//! compare-and-set committed together with the deployment's transition, so
//! of two racing responses exactly one wins and the other gets a conflict.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::authz::{AuthorizationProvider, Capability};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use crate::deploy::queue::DeploymentQueue;
use crate::errors::OrchestratorError;
use crate::models::approval::MAX_APPROVAL_NOTE_LEN;
use crate::models::{
    ApprovalAction, ApprovalAuditEntry, ApprovalStats, ApprovalStatus, Deployment,
    DeploymentApproval, DeploymentStatus,
};
use crate::notify::emitter::emit_quietly;
use crate::notify::{EventName, NotificationEmitter, NotificationEvent};
use crate::storage::{ApprovalStore, DeploymentStore};
use crate::utils::generate_id;

/// Which approvals an actor may act on
enum ApproverScope {
    All,
    Owned,
    Nothing,
}

#[derive(Clone)]
pub struct ApprovalGate {
    approvals: Arc<dyn ApprovalStore>,
    deployments: Arc<dyn DeploymentStore>,
    authz: Arc<dyn AuthorizationProvider>,
    notifier: Arc<dyn NotificationEmitter>,
    queue: DeploymentQueue,
}

impl ApprovalGate {
    pub fn new(
        approvals: Arc<dyn ApprovalStore>,
        deployments: Arc<dyn DeploymentStore>,
        authz: Arc<dyn AuthorizationProvider>,
        notifier: Arc<dyn NotificationEmitter>,
        queue: DeploymentQueue,
    ) -> Self {
        Self {
            approvals,
            deployments,
            authz,
            notifier,
            queue,
        }
    }

    /// Create the approval for a `pending` deployment and park it in
    /// `pending_approval`. Both commit together or not at all.
    pub fn request_approval(
        &self,
        deployment_id: &str,
    ) -> Result<DeploymentApproval, OrchestratorError> {
        let approvals = &self.approvals;
        let mut created = None;
        let deployment = self.deployments.update_deployment(deployment_id, &mut |d| {
            if approvals.approval_for_deployment(&d.id)?.is_some() {
                return Err(OrchestratorError::ConflictError(format!(
                    "Deployment {} already has an approval",
                    d.id
                )));
            }

            let from = d.status;
            d.process(DeploymentEvent::AwaitApproval)?;

            let approval = DeploymentApproval {
                id: generate_id(),
                deployment_id: d.id.clone(),
                project_id: d.project_id.clone(),
                status: ApprovalStatus::Pending,
                requested_by: d.user_id.clone(),
                approved_by: None,
                notes: None,
                requested_at: Utc::now(),
                responded_at: None,
                audit: vec![ApprovalAuditEntry::new(
                    ApprovalAction::Requested,
                    d.user_id.clone(),
                    from,
                    d.status,
                )],
            };
            approvals.insert_approval(approval.clone())?;
            created = Some(approval);
            Ok(())
        })?;
        let approval = created.ok_or_else(|| {
            OrchestratorError::Internal(format!("No approval recorded for {}", deployment_id))
        })?;

        info!(
            "Deployment {} awaiting approval {}",
            deployment.id, approval.id
        );

        let mut event = NotificationEvent::new(
            EventName::ApprovalRequested,
            &deployment.id,
            &deployment.project_id,
            deployment.status.as_str(),
        )
        .with_data(serde_json::json!({
            "approval_id": approval.id,
            "branch": deployment.branch,
            "commit_hash": deployment.commit_hash,
        }));
        if let Some(user) = &deployment.user_id {
            event = event.with_actor(user);
        }
        emit_quietly(self.notifier.as_ref(), event);

        Ok(approval)
    }

    /// Approve and hand the deployment to the worker
    pub async fn approve(
        &self,
        approval_id: &str,
        actor: &str,
        notes: Option<&str>,
    ) -> Result<DeploymentApproval, OrchestratorError> {
        if let Some(notes) = notes {
            check_note_length("Approval notes", notes)?;
        }

        let (approval, deployment) = self
            .respond(
                approval_id,
                actor,
                ApprovalStatus::Approved,
                DeploymentEvent::Approve,
                notes,
            )
            .await?;
        info!("Deployment {} approved by {}", deployment.id, actor);

        if let Err(e) = self.queue.enqueue(&deployment.id) {
            self.abandon(&deployment.id, &e);
            return Err(e);
        }

        let mut event = NotificationEvent::new(
            EventName::Approved,
            &deployment.id,
            &deployment.project_id,
            deployment.status.as_str(),
        )
        .with_actor(actor);
        if let Some(notes) = notes {
            event = event.with_message(notes);
        }
        emit_quietly(self.notifier.as_ref(), event);

        Ok(approval)
    }

    /// Reject; the deployment fails and can never run
    pub async fn reject(
        &self,
        approval_id: &str,
        actor: &str,
        reason: &str,
    ) -> Result<DeploymentApproval, OrchestratorError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(OrchestratorError::ValidationError(
                "A rejection reason is required".to_string(),
            ));
        }
        check_note_length("Rejection reason", reason)?;

        let (approval, deployment) = self
            .respond(
                approval_id,
                actor,
                ApprovalStatus::Rejected,
                DeploymentEvent::Reject(reason.to_string()),
                Some(reason),
            )
            .await?;
        info!("Deployment {} rejected by {}", deployment.id, actor);

        let event = NotificationEvent::new(
            EventName::Rejected,
            &deployment.id,
            &deployment.project_id,
            deployment.status.as_str(),
        )
        .with_actor(actor)
        .with_message(reason);
        emit_quietly(self.notifier.as_ref(), event);

        Ok(approval)
    }

    /// Pending approvals the actor may act on, oldest first
    pub async fn pending_approvals(
        &self,
        actor: &str,
    ) -> Result<Vec<DeploymentApproval>, OrchestratorError> {
        let scope = self.scope(actor).await;
        if matches!(scope, ApproverScope::Nothing) {
            return Ok(Vec::new());
        }

        let mut visible = Vec::new();
        for approval in self.approvals.approvals()? {
            if approval.status != ApprovalStatus::Pending {
                continue;
            }
            if matches!(scope, ApproverScope::Owned)
                && !self.authz.owns_project(actor, &approval.project_id).await
            {
                continue;
            }
            // Cancelled deployments leave their approval pending but moot
            let awaiting = self
                .deployments
                .deployment(&approval.deployment_id)?
                .is_some_and(|d| d.status == DeploymentStatus::PendingApproval);
            if awaiting {
                visible.push(approval);
            }
        }
        Ok(visible)
    }

    /// Approval counts across all projects, or the ones `actor` owns
    pub async fn approval_stats(
        &self,
        actor: Option<&str>,
    ) -> Result<ApprovalStats, OrchestratorError> {
        let mut stats = ApprovalStats::default();
        for approval in self.approvals.approvals()? {
            if let Some(actor) = actor {
                if !self.authz.owns_project(actor, &approval.project_id).await {
                    continue;
                }
            }
            stats.record(approval.status);
        }
        Ok(stats)
    }

    /// Authorize, then commit one response.
    ///
    /// Nothing awaits after authorization: the deployment status check, its
    /// transition and the approval's compare-and-set run inside one
    /// deployment update, so a concurrent cancel or response either lands
    /// before it and yields a conflict, or after it.
    async fn respond(
        &self,
        approval_id: &str,
        actor: &str,
        outcome: ApprovalStatus,
        event: DeploymentEvent,
        notes: Option<&str>,
    ) -> Result<(DeploymentApproval, Deployment), OrchestratorError> {
        let approval = self
            .approvals
            .approval(approval_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("Approval {}", approval_id)))?;
        ensure_pending(&approval)?;
        self.authorize(actor, &approval).await?;

        let action = ApprovalAction::for_outcome(outcome).ok_or_else(|| {
            OrchestratorError::Internal(format!("{} is not a response", outcome))
        })?;
        let approvals = &self.approvals;
        let mut responded = None;
        let deployment = self
            .deployments
            .update_deployment(&approval.deployment_id, &mut |d| {
                if d.status != DeploymentStatus::PendingApproval {
                    return Err(OrchestratorError::ConflictError(format!(
                        "Deployment {} is {}, not awaiting approval",
                        d.id, d.status
                    )));
                }
                let from = d.status;
                d.process(event.clone())?;
                let to = d.status;

                let committed = approvals.update_approval(approval_id, &mut |a| {
                    ensure_pending(a)?;
                    a.status = outcome;
                    a.approved_by = Some(actor.to_string());
                    a.notes = notes.map(str::to_string);
                    a.responded_at = Some(Utc::now());
                    a.audit.push(ApprovalAuditEntry::new(
                        action,
                        Some(actor.to_string()),
                        from,
                        to,
                    ));
                    Ok(())
                })?;
                responded = Some(committed);
                Ok(())
            })?;

        let approval = responded.ok_or_else(|| {
            OrchestratorError::Internal(format!("Approval {} response not recorded", approval_id))
        })?;
        Ok((approval, deployment))
    }

    async fn authorize(
        &self,
        actor: &str,
        approval: &DeploymentApproval,
    ) -> Result<(), OrchestratorError> {
        if approval.requested_by.as_deref() == Some(actor) {
            return Err(OrchestratorError::AuthorizationError(format!(
                "{} cannot respond to their own deployment request",
                actor
            )));
        }

        let allowed = match self.scope(actor).await {
            ApproverScope::All => true,
            ApproverScope::Owned => self.authz.owns_project(actor, &approval.project_id).await,
            ApproverScope::Nothing => false,
        };
        if !allowed {
            return Err(OrchestratorError::AuthorizationError(format!(
                "{} may not approve deployments of project {}",
                actor, approval.project_id
            )));
        }
        Ok(())
    }

    async fn scope(&self, actor: &str) -> ApproverScope {
        if self
            .authz
            .has_capability(actor, Capability::ApproveAllDeployments)
            .await
        {
            ApproverScope::All
        } else if self
            .authz
            .has_capability(actor, Capability::ApproveDeployments)
            .await
        {
            ApproverScope::Owned
        } else {
            ApproverScope::Nothing
        }
    }

    fn abandon(&self, deployment_id: &str, cause: &OrchestratorError) {
        let message = format!("Failed to queue deployment: {}", cause);
        if let Err(e) = self.deployments.update_deployment(deployment_id, &mut |d| {
            d.process(DeploymentEvent::Fail(message.clone()))
        }) {
            warn!("Could not mark deployment {} failed: {}", deployment_id, e);
        }
    }
}

fn ensure_pending(approval: &DeploymentApproval) -> Result<(), OrchestratorError> {
    if approval.status != ApprovalStatus::Pending {
        return Err(OrchestratorError::ConflictError(format!(
            "Approval {} is already {}",
            approval.id, approval.status
        )));
    }
    Ok(())
}

fn check_note_length(what: &str, text: &str) -> Result<(), OrchestratorError> {
    if text.chars().count() > MAX_APPROVAL_NOTE_LEN {
        return Err(OrchestratorError::ValidationError(format!(
            "{} must be at most {} characters",
            what, MAX_APPROVAL_NOTE_LEN
        )));
    }
    Ok(())
}
