//! Finite state machine for the deployment lifecycle
//!
//! ```text
//! pending -> pending_approval -> running -> success | failed
//!    \            |    \------------------> failed (rejected)
//!     \-----------+------> running
//! any non-terminal state -> cancelled
//! ```

use chrono::Utc;

use crate::errors::OrchestratorError;
use crate::models::{Deployment, DeploymentStatus};

/// Lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// Project requires sign-off; park the deployment
    AwaitApproval,

    /// No gate applies; clear for execution
    Start,

    /// Approver signed off
    Approve,

    /// Approver refused, with reason
    Reject(String),

    /// All phases finished without a blocking failure
    Complete,

    /// A phase failed, with description
    Fail(String),

    /// Explicit cancellation request
    Cancel,
}

/// Compute the status an event leads to
pub fn next_status(
    state: DeploymentStatus,
    event: &DeploymentEvent,
) -> Result<DeploymentStatus, OrchestratorError> {
    use DeploymentEvent as E;
    use DeploymentStatus as S;

    let next = match (state, event) {
        // From Pending
        (S::Pending, E::AwaitApproval) => S::PendingApproval,
        (S::Pending, E::Start) => S::Running,

        // From PendingApproval
        (S::PendingApproval, E::Approve) => S::Running,
        (S::PendingApproval, E::Reject(_)) => S::Failed,

        // From Running
        (S::Running, E::Complete) => S::Success,
        (S::Running, E::Fail(_)) => S::Failed,

        // Cancellation from any live state
        (S::Pending | S::PendingApproval | S::Running, E::Cancel) => S::Cancelled,

        (state, event) => {
            return Err(OrchestratorError::ConflictError(format!(
                "Invalid transition: {} -> {:?}",
                state, event
            )));
        }
    };

    Ok(next)
}

/// Event processing on a deployment record
pub trait DeploymentFsm {
    fn process(&mut self, event: DeploymentEvent) -> Result<(), OrchestratorError>;
}

impl DeploymentFsm for Deployment {
    fn process(&mut self, event: DeploymentEvent) -> Result<(), OrchestratorError> {
        let next = next_status(self.status, &event)?;
        let now = Utc::now();

        match &event {
            DeploymentEvent::Start | DeploymentEvent::Approve => {
                self.started_at = Some(now);
            }
            DeploymentEvent::Reject(reason) => {
                self.error_message = Some(format!("Rejected: {}", reason));
            }
            DeploymentEvent::Fail(message) => {
                self.error_message = Some(message.clone());
            }
            _ => {}
        }

        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }
}
