//! Deployment work queue
//!
//! Producers push deployment ids; the deployer worker owns the receiver.

use tokio::sync::mpsc;

use crate::errors::OrchestratorError;

pub type DeploymentReceiver = mpsc::UnboundedReceiver<String>;

#[derive(Debug, Clone)]
pub struct DeploymentQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl DeploymentQueue {
    pub fn channel() -> (Self, DeploymentReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, deployment_id: &str) -> Result<(), OrchestratorError> {
        self.tx.send(deployment_id.to_string()).map_err(|e| {
            OrchestratorError::QueueError(format!("Deployment queue closed, dropped {}", e.0))
        })
    }
}
