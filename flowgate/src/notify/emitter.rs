//! Notification emitters
//!
//! Emission is fire-and-forget: callers log a failed `emit` and carry on,
//! the transition that produced the event stands.

use tokio::sync::broadcast;
use tracing::{info, warn};

use flowgate_events::NotificationEvent;

use crate::errors::OrchestratorError;

/// Notification delivery contract
pub trait NotificationEmitter: Send + Sync {
    fn emit(&self, event: &NotificationEvent) -> Result<(), OrchestratorError>;
}

/// Emit and log delivery failures
pub fn emit_quietly(emitter: &dyn NotificationEmitter, event: NotificationEvent) {
    if let Err(e) = emitter.emit(&event) {
        warn!(
            "Failed to emit {} for deployment {}: {}",
            event.name, event.deployment_id, e
        );
    }
}

/// Writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationEmitter for TracingNotifier {
    fn emit(&self, event: &NotificationEvent) -> Result<(), OrchestratorError> {
        let payload = serde_json::to_string(event)?;
        info!(event = %event.name, "{}", payload);
        Ok(())
    }
}

/// Publishes events on a broadcast channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: broadcast::Sender<NotificationEvent>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }
}

impl NotificationEmitter for ChannelNotifier {
    fn emit(&self, event: &NotificationEvent) -> Result<(), OrchestratorError> {
        self.tx
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| OrchestratorError::NotificationError("no subscribers".to_string()))
    }
}
