// Transient user-facing notifications ("toasts")
// Store operations report failures here instead of returning them to the caller.

use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Whether the notification has been on screen longer than `ttl_secs`
    pub fn is_expired(&self, now: DateTime<Utc>, ttl_secs: i64) -> bool {
        (now - self.created_at).num_seconds() >= ttl_secs
    }
}

/// Sending half of the notification channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Notifier { tx }, rx)
    }

    pub fn error(&self, text: impl Into<String>) {
        self.push(NotificationLevel::Error, text.into());
    }

    pub fn info(&self, text: impl Into<String>) {
        self.push(NotificationLevel::Info, text.into());
    }

    fn push(&self, level: NotificationLevel, text: String) {
        let notification = Notification {
            level,
            text,
            created_at: Utc::now(),
        };
        // Nobody listening is fine: the toast surface may already be gone.
        if self.tx.send(notification).is_err() {
            debug!("Notification dropped, no receiver");
        }
    }
}
