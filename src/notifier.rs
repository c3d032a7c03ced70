//! Desktop notification dispatch

use tracing::warn;

/// Fire-and-forget sink for user-facing alerts
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Sink backed by the desktop notification service
pub struct DesktopNotifier;

impl NotificationSink for DesktopNotifier {
    fn notify(&self, title: &str, body: &str) {
        let result = notify_rust::Notification::new()
            .summary(title)
            .body(body)
            .appname(crate::APP_NAME)
            .show();
        if let Err(e) = result {
            warn!("Failed to send notification: {}", e);
        }
    }
}

/// Sink that drops everything, for tests and headless runs
pub struct NullNotifier;

impl NotificationSink for NullNotifier {
    fn notify(&self, _title: &str, _body: &str) {}
}
