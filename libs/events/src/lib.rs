//! Flowgate notification payloads
//!
//! Shared between the orchestrator and whatever delivers notifications.

pub mod models;

pub use models::{EventName, NotificationEvent};
