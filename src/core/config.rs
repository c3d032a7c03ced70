//! Monitoring configuration management

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Monitoring configuration
///
/// Owned externally (the GUI edits and persists it); the core reads a
/// snapshot of it at the start of every poll cycle and on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    // Watched applications
    /// Application names to track each cycle
    pub monitored_apps: Vec<String>,
    /// Per-app RAM thresholds in MB; exceeding one triggers an automatic quit
    pub quit_list: HashMap<String, f64>,
    /// Per-app launch paths used to reopen an app after an automatic quit
    pub reopen_list: HashMap<String, String>,

    // Feature flags
    /// Track open applications and drive the quit/reopen machinery
    pub monitor_open_apps: bool,
    /// Track camera connection and in-use state
    pub monitor_cameras: bool,
    /// Track microphone connection and in-use state
    pub monitor_microphones: bool,
    /// Collect CPU load per core
    pub monitor_cpu: bool,
    /// Collect the memory tier breakdown
    pub monitor_ram: bool,
    /// Collect the battery snapshot
    pub monitor_battery: bool,

    // Notifications
    /// Deliver desktop notifications for quits and device transitions
    pub notifications: bool,

    // Control server
    /// First port probed when binding the control server
    pub start_port: u16,
    /// Last port probed (inclusive)
    pub end_port: u16,
    /// Start the control server as soon as the process starts
    pub start_api_on_startup: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitored_apps: Vec::new(),
            quit_list: HashMap::new(),
            reopen_list: HashMap::new(),

            monitor_open_apps: true,
            monitor_cameras: true,
            monitor_microphones: true,
            monitor_cpu: true,
            monitor_ram: true,
            monitor_battery: true,

            notifications: true,

            start_port: 5005,
            end_port: 5015,
            start_api_on_startup: true,
        }
    }
}

impl MonitorConfig {
    /// Validate the configuration and fix any invalid values
    pub fn validate(&mut self) {
        // A zeroed end port marks a settings file written before the key
        // existed; the historical fallback is ten ports above the start.
        if self.end_port == 0 {
            self.end_port = self.start_port.saturating_add(10);
        }
        // quit/reopen keys are always a subset of the monitored list
        let monitored = &self.monitored_apps;
        self.quit_list
            .retain(|name, threshold| *threshold > 0.0 && monitored.iter().any(|n| n == name));
        self.reopen_list
            .retain(|name, path| !path.is_empty() && monitored.iter().any(|n| n == name));
    }

    /// Whether an application name is on the monitored list
    pub fn is_monitored(&self, name: &str) -> bool {
        self.monitored_apps.iter().any(|app| app == name)
    }

    /// RAM threshold in MB for an app, if auto-quit is configured for it
    pub fn quit_threshold(&self, name: &str) -> Option<f64> {
        self.quit_list.get(name).copied()
    }

    /// Launch path for an app that should be reopened after an automatic quit
    pub fn reopen_path(&self, name: &str) -> Option<&str> {
        self.reopen_list.get(name).map(String::as_str)
    }
}

/// Thread-safe handle to the live configuration
///
/// The settings watcher replaces the inner value when the settings file
/// changes; readers take point-in-time snapshots.
pub struct SharedConfig {
    inner: Arc<RwLock<MonitorConfig>>,
}

impl SharedConfig {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Clone the current configuration
    pub fn snapshot(&self) -> MonitorConfig {
        self.inner
            .read()
            .map(|config| config.clone())
            .unwrap_or_default()
    }

    /// Replace the configuration wholesale
    pub fn replace(&self, mut config: MonitorConfig) {
        config.validate();
        if let Ok(mut current) = self.inner.write() {
            *current = config;
        }
    }

    /// Apply a mutation to the live configuration
    pub fn update<F: FnOnce(&mut MonitorConfig)>(&self, apply: F) {
        if let Ok(mut current) = self.inner.write() {
            apply(&mut current);
            current.validate();
        }
    }
}

impl Clone for SharedConfig {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
