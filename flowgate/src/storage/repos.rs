//! Repository contracts
//!
//! Each mutation runs a closure against one aggregate (a stage group, a
//! deployment or an approval) as a single transaction: the closure works on
//! a copy, and the copy is committed only when the closure returns `Ok`.
//! A closure returning `Err` leaves the stored record untouched.

use crate::errors::OrchestratorError;
use crate::models::{Deployment, DeploymentApproval, Phase, PipelineStage, Project};

pub type StageGroupUpdate<'a> =
    &'a mut dyn FnMut(&mut Vec<PipelineStage>) -> Result<(), OrchestratorError>;

pub type DeploymentUpdate<'a> =
    &'a mut dyn FnMut(&mut Deployment) -> Result<(), OrchestratorError>;

pub type ApprovalUpdate<'a> =
    &'a mut dyn FnMut(&mut DeploymentApproval) -> Result<(), OrchestratorError>;

pub type DeploymentPrecondition<'a> =
    &'a dyn Fn(&[Deployment]) -> Result<(), OrchestratorError>;

/// Project records
pub trait ProjectStore: Send + Sync {
    fn project(&self, id: &str) -> Result<Option<Project>, OrchestratorError>;

    fn projects(&self) -> Result<Vec<Project>, OrchestratorError>;

    /// Insert or replace
    fn save_project(&self, project: Project) -> Result<(), OrchestratorError>;
}

/// Pipeline stages, grouped by {project, phase}
pub trait StageStore: Send + Sync {
    /// One group ordered by position
    fn stage_group(
        &self,
        project_id: &str,
        phase: Phase,
    ) -> Result<Vec<PipelineStage>, OrchestratorError>;

    fn stage(&self, id: &str) -> Result<Option<PipelineStage>, OrchestratorError>;

    /// Rewrite one group atomically. The closure receives the group ordered
    /// by position and whatever it leaves behind replaces the group.
    fn update_stage_group(
        &self,
        project_id: &str,
        phase: Phase,
        update: StageGroupUpdate<'_>,
    ) -> Result<Vec<PipelineStage>, OrchestratorError>;
}

/// Deployment records
pub trait DeploymentStore: Send + Sync {
    /// Insert a new deployment. `precondition` sees the project's existing
    /// deployments under the same transaction and may veto the insert.
    fn insert_deployment(
        &self,
        deployment: Deployment,
        precondition: DeploymentPrecondition<'_>,
    ) -> Result<(), OrchestratorError>;

    fn deployment(&self, id: &str) -> Result<Option<Deployment>, OrchestratorError>;

    /// Deployments of a project, newest first
    fn project_deployments(&self, project_id: &str)
        -> Result<Vec<Deployment>, OrchestratorError>;

    fn update_deployment(
        &self,
        id: &str,
        update: DeploymentUpdate<'_>,
    ) -> Result<Deployment, OrchestratorError>;
}

/// Approval records
pub trait ApprovalStore: Send + Sync {
    fn insert_approval(&self, approval: DeploymentApproval) -> Result<(), OrchestratorError>;

    fn approval(&self, id: &str) -> Result<Option<DeploymentApproval>, OrchestratorError>;

    fn approval_for_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Option<DeploymentApproval>, OrchestratorError>;

    /// All approvals, oldest request first
    fn approvals(&self) -> Result<Vec<DeploymentApproval>, OrchestratorError>;

    fn update_approval(
        &self,
        id: &str,
        update: ApprovalUpdate<'_>,
    ) -> Result<DeploymentApproval, OrchestratorError>;
}
