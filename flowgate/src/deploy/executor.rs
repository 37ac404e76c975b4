//! Stage executor
//!
//! Runs the stages of one phase strictly in position order against the
//! deployment's server. Cancellation is checked between stages; a command
//! already in flight is only cut short by its stage timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::deploy::runner::CommandRunner;
use crate::errors::OrchestratorError;
use crate::models::{
    Deployment, DeploymentStatus, Phase, PhaseResult, PipelineStage, StageResult, StageRunStatus,
};
use crate::pipeline::StageRegistry;
use crate::storage::DeploymentStore;

/// Stage executor
#[derive(Clone)]
pub struct StageExecutor {
    runner: Arc<dyn CommandRunner>,
    registry: StageRegistry,
    deployments: Arc<dyn DeploymentStore>,
}

impl StageExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        registry: StageRegistry,
        deployments: Arc<dyn DeploymentStore>,
    ) -> Self {
        Self {
            runner,
            registry,
            deployments,
        }
    }

    /// Run every stage of `phase` for `deployment`.
    ///
    /// Stage failures are reported in the returned [`PhaseResult`]; `Err` is
    /// reserved for storage problems.
    pub async fn run_phase(
        &self,
        deployment: &Deployment,
        phase: Phase,
    ) -> Result<PhaseResult, OrchestratorError> {
        let stages = self.registry.list_stages(&deployment.project_id, phase)?;
        info!(
            "Deployment {}: running {} ({} stages)",
            deployment.id,
            phase,
            stages.len()
        );

        let mut result = PhaseResult {
            phase,
            succeeded: true,
            cancelled: false,
            stages: Vec::with_capacity(stages.len()),
        };

        for stage in &stages {
            if self.is_cancelled(&deployment.id)? {
                info!("Deployment {} cancelled, stopping {}", deployment.id, phase);
                result.cancelled = true;
                break;
            }

            if !stage.enabled {
                debug!("Skipping disabled stage '{}'", stage.name);
                result.stages.push(skipped(stage));
                continue;
            }

            let stage_result = self.run_stage(deployment, stage).await;
            let failed = stage_result.status.is_failure();
            result.stages.push(stage_result);

            if failed {
                if stage.continue_on_failure {
                    warn!(
                        "Stage '{}' failed, continuing (continue_on_failure)",
                        stage.name
                    );
                    continue;
                }
                warn!("Stage '{}' failed, stopping {}", stage.name, phase);
                result.succeeded = false;
                break;
            }
        }

        Ok(result)
    }

    async fn run_stage(&self, deployment: &Deployment, stage: &PipelineStage) -> StageResult {
        debug!("Running stage '{}' ({} commands)", stage.name, stage.commands.len());

        let started = Instant::now();
        let deadline = started + Duration::from_secs(u64::from(stage.timeout_seconds));
        let mut output = String::new();
        let mut exit_code = None;
        let mut status = StageRunStatus::Succeeded;

        for command in &stage.commands {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let run = self
                .runner
                .run(&deployment.server_id, command, remaining, &stage.env);

            // The runner may hit the same deadline first and say so itself
            match tokio::time::timeout_at(deadline, run).await {
                Err(_) | Ok(Err(OrchestratorError::CommandTimeout(_))) => {
                    output.push_str(&format!(
                        "Stage timed out after {}s while running: {}\n",
                        stage.timeout_seconds, command
                    ));
                    status = StageRunStatus::TimedOut;
                    break;
                }
                Ok(Err(e)) => {
                    output.push_str(&format!("{}\n", e));
                    status = StageRunStatus::Failed;
                    break;
                }
                Ok(Ok(out)) => {
                    output.push_str(&out.output);
                    exit_code = Some(out.exit_code);
                    if !out.success() {
                        status = StageRunStatus::Failed;
                        break;
                    }
                }
            }
        }

        StageResult {
            stage_id: stage.id.clone(),
            name: stage.name.clone(),
            status,
            continue_on_failure: stage.continue_on_failure,
            exit_code,
            output,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn is_cancelled(&self, deployment_id: &str) -> Result<bool, OrchestratorError> {
        let current = self
            .deployments
            .deployment(deployment_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("Deployment {}", deployment_id)))?;
        Ok(current.status == DeploymentStatus::Cancelled)
    }
}

fn skipped(stage: &PipelineStage) -> StageResult {
    StageResult {
        stage_id: stage.id.clone(),
        name: stage.name.clone(),
        status: StageRunStatus::Skipped,
        continue_on_failure: stage.continue_on_failure,
        exit_code: None,
        output: String::new(),
        duration_ms: 0,
    }
}
