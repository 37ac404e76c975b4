//! Event models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of an orchestration event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "deployment.approval_requested")]
    ApprovalRequested,

    #[serde(rename = "deployment.approved")]
    Approved,

    #[serde(rename = "deployment.rejected")]
    Rejected,

    #[serde(rename = "deployment.rollback_requested")]
    RollbackRequested,

    #[serde(rename = "deployment.succeeded")]
    Succeeded,

    #[serde(rename = "deployment.failed")]
    Failed,

    #[serde(rename = "deployment.cancelled")]
    Cancelled,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::ApprovalRequested => "deployment.approval_requested",
            EventName::Approved => "deployment.approved",
            EventName::Rejected => "deployment.rejected",
            EventName::RollbackRequested => "deployment.rollback_requested",
            EventName::Succeeded => "deployment.succeeded",
            EventName::Failed => "deployment.failed",
            EventName::Cancelled => "deployment.cancelled",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification payload handed to the delivery collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Event name
    pub name: EventName,

    /// Deployment the event is about
    pub deployment_id: String,

    /// Project owning the deployment
    pub project_id: String,

    /// Actor that caused the event, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    /// Deployment status after the transition
    pub status: String,

    /// Free-text detail (approval notes, rejection reason, failure message)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Extra structured data
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,

    /// When the event happened
    pub occurred_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(
        name: EventName,
        deployment_id: impl Into<String>,
        project_id: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            name,
            deployment_id: deployment_id.into(),
            project_id: project_id.into(),
            actor: None,
            status: status.into(),
            message: None,
            data: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
