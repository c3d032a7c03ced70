//! Shared monitoring state - the hub the scheduler and server both hold

use std::sync::Arc;

use tokio::sync::{broadcast, oneshot, RwLock};
use tracing::warn;

use super::apps::{AppRegistry, AppSnapshot};
use super::config::SharedConfig;
use super::devices::{DeviceInfo, DeviceKind, DeviceRegistry};
use super::resources::ResourceMonitor;
use crate::notifier::NotificationSink;
use crate::platform::ProcessControl;

/// Capacity of the push-update channel; slow subscribers lag, they never
/// block the poll cycle.
const UPDATE_CHANNEL_CAPACITY: usize = 100;

/// Everything the poll cycle writes and the control server reads
pub struct MonitorState {
    pub config: SharedConfig,
    pub apps: Arc<RwLock<AppRegistry>>,
    pub cameras: Arc<RwLock<DeviceRegistry>>,
    pub microphones: Arc<RwLock<DeviceRegistry>>,
    pub resources: Arc<RwLock<ResourceMonitor>>,
    pub updates: broadcast::Sender<serde_json::Value>,
    pub control: Arc<dyn ProcessControl>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl MonitorState {
    pub fn new(
        config: SharedConfig,
        control: Arc<dyn ProcessControl>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            config,
            apps: Arc::new(RwLock::new(AppRegistry::new())),
            cameras: Arc::new(RwLock::new(DeviceRegistry::new(DeviceKind::Camera))),
            microphones: Arc::new(RwLock::new(DeviceRegistry::new(DeviceKind::Microphone))),
            resources: Arc::new(RwLock::new(ResourceMonitor::new())),
            updates,
            control,
            notifier,
        }
    }

    /// Subscribe to push updates
    pub fn subscribe_updates(&self) -> broadcast::Receiver<serde_json::Value> {
        self.updates.subscribe()
    }

    /// Fan a push update out to subscribers; a send with no receivers is
    /// not an error.
    pub fn broadcast(&self, update: serde_json::Value) {
        let _ = self.updates.send(update);
    }

    /// Add an app to the monitored list
    pub fn add_monitored(&self, name: &str) {
        self.config.update(|config| {
            if !config.monitored_apps.iter().any(|n| n == name) {
                config.monitored_apps.push(name.to_string());
            }
        });
    }

    /// Remove an app from the monitored list along with its quit/reopen
    /// configuration
    pub fn remove_monitored(&self, name: &str) {
        self.config.update(|config| {
            config.monitored_apps.retain(|n| n != name);
            config.quit_list.remove(name);
            config.reopen_list.remove(name);
        });
    }

    /// Set or clear the auto-quit RAM threshold for an app
    pub fn set_quit_threshold(&self, name: &str, threshold_mb: Option<f64>) {
        self.config.update(|config| match threshold_mb {
            Some(mb) => {
                config.quit_list.insert(name.to_string(), mb);
            }
            None => {
                config.quit_list.remove(name);
            }
        });
    }

    /// Set or clear the reopen path for an app
    pub fn set_reopen_path(&self, name: &str, path: Option<String>) {
        self.config.update(|config| match path {
            Some(path) => {
                config.reopen_list.insert(name.to_string(), path);
            }
            None => {
                config.reopen_list.remove(name);
            }
        });
    }

    /// Launch an application immediately
    pub fn open_application(&self, path: &str) -> bool {
        match self.control.launch(path) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to open {}: {}", path, e);
                false
            }
        }
    }

    /// Queue termination requests for the next poll cycle
    pub async fn request_terminate(&self, names: Vec<String>) -> oneshot::Receiver<()> {
        self.apps.write().await.request_terminate(names)
    }

    /// Monitored-app snapshots, case-insensitive ascending by name
    pub async fn app_snapshots(&self) -> Vec<AppSnapshot> {
        self.apps.read().await.snapshot()
    }

    /// Running app names, case-insensitive ascending
    pub async fn open_apps(&self) -> Vec<String> {
        self.apps.read().await.open_apps()
    }

    /// Known cameras, ascending by name
    pub async fn camera_snapshots(&self) -> Vec<DeviceInfo> {
        self.cameras.read().await.snapshot()
    }

    /// Known microphones, ascending by name
    pub async fn microphone_snapshots(&self) -> Vec<DeviceInfo> {
        self.microphones.read().await.snapshot()
    }
}

impl Clone for MonitorState {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            apps: Arc::clone(&self.apps),
            cameras: Arc::clone(&self.cameras),
            microphones: Arc::clone(&self.microphones),
            resources: Arc::clone(&self.resources),
            updates: self.updates.clone(),
            control: Arc::clone(&self.control),
            notifier: Arc::clone(&self.notifier),
        }
    }
}
