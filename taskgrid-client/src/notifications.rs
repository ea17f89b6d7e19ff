//! User-facing notices raised by the workspace.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// What the operator can do about a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Retry,
    Reconnect,
}

/// A notice shown to the operator. A failed task write carries `Retry`;
/// a dropped project channel carries `Reconnect`.
#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub action: Option<NotificationAction>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            action: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.action = Some(action);
        self
    }
}
