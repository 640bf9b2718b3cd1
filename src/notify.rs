//! Operator-facing status messages.
//!
//! Notifications are fire-and-forget: a sink that fails to render is logged
//! and otherwise ignored, so the flow never stalls on its own status output.

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::browser::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Success => write!(f, "success"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// A sink outside the page (terminal, test recorder).
pub trait Notifier {
    fn notify(&mut self, notification: &Notification);
}

/// Fans a notification out to two sinks.
impl<A: Notifier, B: Notifier> Notifier for (A, B) {
    fn notify(&mut self, notification: &Notification) {
        self.0.notify(notification);
        self.1.notify(notification);
    }
}

/// Sends `notification` to the log, the out-of-page sink and the page itself.
pub async fn announce<P: Page, N: Notifier>(
    page: &mut P,
    notifier: &mut N,
    notification: Notification,
) {
    match notification.severity {
        Severity::Info | Severity::Success => info!(message = %notification.message, "notify"),
        Severity::Warning => warn!(message = %notification.message, "notify"),
        Severity::Error => error!(message = %notification.message, "notify"),
    }
    notifier.notify(&notification);
    if let Err(e) = page
        .show_toast(notification.severity, &notification.message)
        .await
    {
        debug!(error = %e, "in-page toast not rendered");
    }
}

/// Keeps every notification; used by tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub notifications: Vec<Notification>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn count(&self, severity: Severity) -> usize {
        self.notifications
            .iter()
            .filter(|n| n.severity == severity)
            .count()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&mut self, notification: &Notification) {
        self.notifications.push(notification.clone());
    }
}
