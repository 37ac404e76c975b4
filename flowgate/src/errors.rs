//! Error types for the flowgate orchestrator

use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authorization error: {0}")]
    AuthorizationError(String),

    #[error("Conflict: {0}")]
    ConflictError(String),

    #[error("Not eligible for rollback: {0}")]
    NotEligibleError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Command error: {0}")]
    CommandError(String),

    #[error("Command timed out: {0}")]
    CommandTimeout(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Errors the caller caused and can correct; never leave state behind
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ValidationError(_)
                | OrchestratorError::AuthorizationError(_)
                | OrchestratorError::ConflictError(_)
                | OrchestratorError::NotEligibleError(_)
        )
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}
