//! Operator alerts.

use std::fmt;

use parking_lot::Mutex;
use tracing::{error, warn};

/// Alert urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPriority {
    Normal,
    High,
}

impl fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Sink for operator alerts. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str, priority: AlertPriority);
}

/// Writes alerts to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str, priority: AlertPriority) {
        match priority {
            AlertPriority::High => error!(alert = title, message, "ALERT"),
            AlertPriority::Normal => warn!(alert = title, message, "Alert"),
        }
    }
}

/// A recorded alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub priority: AlertPriority,
}

/// Records alerts for assertions.
#[derive(Debug, Default)]
pub struct MockNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

impl Notifier for MockNotifier {
    fn notify(&self, title: &str, message: &str, priority: AlertPriority) {
        self.alerts.lock().push(Alert {
            title: title.to_string(),
            message: message.to_string(),
            priority,
        });
    }
}
