//! Notification emission

pub mod emitter;

pub use emitter::{ChannelNotifier, NotificationEmitter, TracingNotifier};
pub use flowgate_events::{EventName, NotificationEvent};
