//! Deployment lifecycle
//!
//! Creates deployments, routes them through the approval gate and runs the
//! three phases once a worker picks them up.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::deploy::approval::ApprovalGate;
use crate::deploy::executor::StageExecutor;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use crate::deploy::queue::DeploymentQueue;
use crate::errors::OrchestratorError;
use crate::models::{
    Deployment, DeploymentRequest, DeploymentStatus, Phase, PhaseResult, PostDeployFailurePolicy,
    Project, StageRunStatus, TriggerSource,
};
use crate::notify::emitter::emit_quietly;
use crate::notify::{EventName, NotificationEmitter, NotificationEvent};
use crate::storage::{DeploymentStore, ProjectStore};
use crate::utils::generate_id;

/// How a run of the phases ended
#[derive(Debug)]
enum RunOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Clone)]
pub struct DeploymentService {
    projects: Arc<dyn ProjectStore>,
    deployments: Arc<dyn DeploymentStore>,
    executor: StageExecutor,
    gate: ApprovalGate,
    notifier: Arc<dyn NotificationEmitter>,
    queue: DeploymentQueue,
    single_active: bool,
}

impl DeploymentService {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        deployments: Arc<dyn DeploymentStore>,
        executor: StageExecutor,
        gate: ApprovalGate,
        notifier: Arc<dyn NotificationEmitter>,
        queue: DeploymentQueue,
    ) -> Self {
        Self {
            projects,
            deployments,
            executor,
            gate,
            notifier,
            queue,
            single_active: false,
        }
    }

    /// Refuse new deployments while the project has one in flight
    pub fn single_active_deployment(mut self, enabled: bool) -> Self {
        self.single_active = enabled;
        self
    }

    /// Create a deployment and gate or queue it.
    ///
    /// Returns once the deployment is either `pending_approval` or queued
    /// as `running`; execution happens on the worker.
    pub fn request_deployment(
        &self,
        request: DeploymentRequest,
    ) -> Result<Deployment, OrchestratorError> {
        let project = self
            .projects
            .project(&request.project_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("Project {}", request.project_id)))?;
        let deployment = build_deployment(&project, request)?;
        let id = deployment.id.clone();

        let single_active = self.single_active;
        self.deployments
            .insert_deployment(deployment, &|siblings: &[Deployment]| {
                if !single_active {
                    return Ok(());
                }
                match siblings.iter().find(|d| !d.status.is_terminal()) {
                    Some(active) => Err(OrchestratorError::ConflictError(format!(
                        "Project {} already has deployment {} {}",
                        project.id, active.id, active.status
                    ))),
                    None => Ok(()),
                }
            })?;

        let gated = self.load(&id)?;
        if project.requires_approval_for(&gated.branch) {
            self.gate.request_approval(&id)?;
            return self.load(&id);
        }

        let deployment = self
            .deployments
            .update_deployment(&id, &mut |d| d.process(DeploymentEvent::Start))?;
        info!(
            "Deployment {} of {} ({}) queued",
            deployment.id, deployment.project_id, deployment.branch
        );

        if let Err(e) = self.queue.enqueue(&id) {
            let message = format!("Failed to queue deployment: {}", e);
            self.deployments
                .update_deployment(&id, &mut |d| d.process(DeploymentEvent::Fail(message.clone())))?;
            return Err(e);
        }
        Ok(deployment)
    }

    /// Run all phases of a `running` deployment. Anything else is returned
    /// untouched, which covers deployments cancelled while queued.
    pub async fn execute(&self, id: &str) -> Result<Deployment, OrchestratorError> {
        let deployment = self.load(id)?;
        if deployment.status != DeploymentStatus::Running {
            debug!(
                "Deployment {} is {}, nothing to execute",
                deployment.id, deployment.status
            );
            return Ok(deployment);
        }

        let policy = self
            .projects
            .project(&deployment.project_id)?
            .map(|p| p.post_deploy_failure)
            .unwrap_or_default();

        info!("Executing deployment {}", deployment.id);
        let outcome = match self.run_phases(&deployment, policy).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Deployment {} aborted: {}", deployment.id, e);
                RunOutcome::Failed(format!("Deployment aborted: {}", e))
            }
        };

        self.finish(id, outcome)
    }

    /// Fail a queued deployment that will never be executed. A deployment
    /// cancelled in the meantime stays cancelled.
    pub fn abandon(&self, id: &str, reason: &str) -> Result<Deployment, OrchestratorError> {
        warn!("Abandoning deployment {}: {}", id, reason);
        self.finish(id, RunOutcome::Failed(reason.to_string()))
    }

    /// Cancel a deployment that has not finished yet
    pub fn cancel(&self, id: &str, actor: Option<&str>) -> Result<Deployment, OrchestratorError> {
        let deployment = self
            .deployments
            .update_deployment(id, &mut |d| d.process(DeploymentEvent::Cancel))?;
        info!("Deployment {} cancelled", deployment.id);

        let mut event = NotificationEvent::new(
            EventName::Cancelled,
            &deployment.id,
            &deployment.project_id,
            deployment.status.as_str(),
        );
        if let Some(actor) = actor {
            event = event.with_actor(actor);
        }
        emit_quietly(self.notifier.as_ref(), event);

        Ok(deployment)
    }

    pub fn deployment(&self, id: &str) -> Result<Deployment, OrchestratorError> {
        self.load(id)
    }

    /// Deployments of a project, newest first
    pub fn history(&self, project_id: &str) -> Result<Vec<Deployment>, OrchestratorError> {
        self.deployments.project_deployments(project_id)
    }

    async fn run_phases(
        &self,
        deployment: &Deployment,
        policy: PostDeployFailurePolicy,
    ) -> Result<RunOutcome, OrchestratorError> {
        let pre = self.run_and_record(deployment, Phase::PreDeploy).await?;
        if pre.cancelled {
            return Ok(RunOutcome::Cancelled);
        }
        if !pre.succeeded {
            return Ok(RunOutcome::Failed(failure_message(&pre)));
        }

        let deploy = self.run_and_record(deployment, Phase::Deploy).await?;
        if deploy.cancelled {
            return Ok(RunOutcome::Cancelled);
        }

        // post_deploy runs after a failed deploy too, for cleanup
        let post = self.run_and_record(deployment, Phase::PostDeploy).await?;

        if !deploy.succeeded {
            return Ok(RunOutcome::Failed(failure_message(&deploy)));
        }
        if post.cancelled {
            return Ok(RunOutcome::Cancelled);
        }
        if !post.succeeded {
            match policy {
                PostDeployFailurePolicy::FailDeployment => {
                    return Ok(RunOutcome::Failed(failure_message(&post)));
                }
                PostDeployFailurePolicy::Ignore => {
                    warn!(
                        "Deployment {}: {} (ignored by project policy)",
                        deployment.id,
                        failure_message(&post)
                    );
                }
            }
        }

        Ok(RunOutcome::Completed)
    }

    async fn run_and_record(
        &self,
        deployment: &Deployment,
        phase: Phase,
    ) -> Result<PhaseResult, OrchestratorError> {
        let result = self.executor.run_phase(deployment, phase).await?;
        let recorded = result.clone();
        self.deployments.update_deployment(&deployment.id, &mut |d| {
            d.phase_results.push(recorded.clone());
            Ok(())
        })?;
        Ok(result)
    }

    fn finish(&self, id: &str, outcome: RunOutcome) -> Result<Deployment, OrchestratorError> {
        let event = match &outcome {
            RunOutcome::Completed => DeploymentEvent::Complete,
            RunOutcome::Failed(message) => DeploymentEvent::Fail(message.clone()),
            RunOutcome::Cancelled => return self.load(id),
        };

        let mut was_cancelled = false;
        let deployment = self.deployments.update_deployment(id, &mut |d| {
            // A cancel that landed mid-run wins
            if d.status == DeploymentStatus::Cancelled {
                was_cancelled = true;
                return Ok(());
            }
            d.process(event.clone())
        })?;
        if was_cancelled {
            return Ok(deployment);
        }

        let elapsed = deployment
            .started_at
            .map(|started| (Utc::now() - started).num_milliseconds())
            .unwrap_or_default();
        let name = match deployment.status {
            DeploymentStatus::Success => {
                info!("Deployment {} succeeded in {}ms", deployment.id, elapsed);
                EventName::Succeeded
            }
            _ => {
                info!(
                    "Deployment {} failed: {}",
                    deployment.id,
                    deployment.error_message.as_deref().unwrap_or("unknown error")
                );
                EventName::Failed
            }
        };

        let mut event = NotificationEvent::new(
            name,
            &deployment.id,
            &deployment.project_id,
            deployment.status.as_str(),
        );
        if let Some(message) = &deployment.error_message {
            event = event.with_message(message);
        }
        emit_quietly(self.notifier.as_ref(), event);

        Ok(deployment)
    }

    fn load(&self, id: &str) -> Result<Deployment, OrchestratorError> {
        self.deployments
            .deployment(id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("Deployment {}", id)))
    }
}

fn build_deployment(
    project: &Project,
    request: DeploymentRequest,
) -> Result<Deployment, OrchestratorError> {
    let branch = request.branch.trim().to_string();
    if branch.is_empty() {
        return Err(OrchestratorError::ValidationError(
            "Branch is required".to_string(),
        ));
    }

    let server_id = request
        .server_id
        .or_else(|| project.server_id.clone())
        .ok_or_else(|| {
            OrchestratorError::ValidationError(format!(
                "No server given and project {} has no default server",
                project.id
            ))
        })?;

    let is_rollback = request.triggered_by == TriggerSource::Rollback;
    if is_rollback != request.rollback_source_id.is_some() {
        return Err(OrchestratorError::ValidationError(
            "Rollback deployments need a rollback source and only they may have one".to_string(),
        ));
    }

    Ok(Deployment {
        id: generate_id(),
        project_id: project.id.clone(),
        server_id,
        user_id: request.user_id,
        status: DeploymentStatus::Pending,
        commit_hash: request.commit_hash,
        commit_message: request.commit_message,
        branch,
        triggered_by: request.triggered_by,
        rollback_source_id: request.rollback_source_id,
        error_message: None,
        phase_results: Vec::new(),
        created_at: Utc::now(),
        started_at: None,
        finished_at: None,
    })
}

/// Describe the stage that stopped a phase
fn failure_message(result: &PhaseResult) -> String {
    match result.blocking_failure() {
        Some(stage) if stage.status == StageRunStatus::TimedOut => {
            format!("{} failed: stage '{}' timed out", result.phase, stage.name)
        }
        Some(stage) => match stage.exit_code {
            Some(code) => format!(
                "{} failed: stage '{}' exited with code {}",
                result.phase, stage.name, code
            ),
            None => format!("{} failed: stage '{}' could not run", result.phase, stage.name),
        },
        None => format!("{} failed", result.phase),
    }
}
