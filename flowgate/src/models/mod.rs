//! Orchestration records

pub mod approval;
pub mod deployment;
pub mod project;
pub mod stage;

pub use approval::{
    ApprovalAction, ApprovalAuditEntry, ApprovalStats, ApprovalStatus, DeploymentApproval,
};
pub use deployment::{
    Deployment, DeploymentRequest, DeploymentStatus, PhaseResult, StageResult, StageRunStatus,
    TriggerSource,
};
pub use project::{ApprovalRules, PostDeployFailurePolicy, Project};
pub use stage::{Phase, PipelineStage, StageDefinition};
