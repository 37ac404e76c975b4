//! Deployment orchestration

pub mod approval;
pub mod executor;
pub mod fsm;
pub mod lifecycle;
pub mod queue;
pub mod rollback;
pub mod runner;

pub use approval::ApprovalGate;
pub use executor::StageExecutor;
pub use lifecycle::DeploymentService;
pub use queue::{DeploymentQueue, DeploymentReceiver};
pub use rollback::{RollbackPoint, RollbackSelector};
pub use runner::{CommandOutput, CommandRunner, LocalShellRunner};
