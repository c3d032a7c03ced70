//! Settings persistence - the JSON settings file and its change watcher

use std::fs;
use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::config::{MonitorConfig, SharedConfig};
use crate::error::{GuardianError, Result};

/// Loads, saves, and watches the settings file
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Store at the default location under the user config directory
    pub fn default_location() -> Self {
        let path = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("OverSightGuardian")
            .join("settings.json");
        Self { path }
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the settings file; defaults when it does not exist yet
    pub fn load(&self) -> Result<MonitorConfig> {
        if !self.path.exists() {
            info!(
                "No settings file at {}, using defaults",
                self.path.display()
            );
            let mut config = MonitorConfig::default();
            config.validate();
            return Ok(config);
        }

        let content = fs::read_to_string(&self.path)?;
        let mut config: MonitorConfig = serde_json::from_str(&content)
            .map_err(|e| GuardianError::settings(format!("Malformed settings file: {}", e)))?;
        config.validate();
        Ok(config)
    }

    /// Write the settings file, creating parent directories as needed
    pub fn save(&self, config: &MonitorConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    /// Watch the settings file and fold edits into the live config.
    ///
    /// Watches the parent directory so editors that replace the file are
    /// caught too. The returned watcher must stay alive for events to
    /// keep flowing.
    pub fn watch(&self, config: SharedConfig) -> Result<RecommendedWatcher> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })
        .map_err(|e| GuardianError::settings(format!("Settings watcher init failed: {}", e)))?;

        let dir = self
            .path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| GuardianError::settings(format!("Settings watch failed: {}", e)))?;

        let store = Self {
            path: self.path.clone(),
        };
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    Ok(event)
                        if event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == store.path.file_name()) =>
                    {
                        match store.load() {
                            Ok(new_config) => {
                                info!("Settings file changed, reloading");
                                config.replace(new_config);
                            }
                            Err(e) => warn!("Ignoring settings change: {}", e),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Settings watcher error: {}", e),
                }
            }
        });

        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Test that a missing file yields validated defaults
    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::at(dir.path().join("settings.json"));

        let config = store.load().unwrap();
        assert_eq!(config.start_port, 5005);
        assert_eq!(config.end_port, 5015);
        assert!(config.monitored_apps.is_empty());
    }

    /// Test that save and load round-trip the configuration
    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::at(dir.path().join("nested").join("settings.json"));

        let mut config = MonitorConfig::default();
        config.monitored_apps.push("Safari".into());
        config.quit_list.insert("Safari".into(), 512.0);
        config
            .reopen_list
            .insert("Safari".into(), "/Applications/Safari.app".into());
        config.notifications = false;
        store.save(&config).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.monitored_apps, vec!["Safari"]);
        assert_eq!(loaded.quit_list.get("Safari"), Some(&512.0));
        assert!(!loaded.notifications);
    }

    /// Test that the file uses the wire key casing
    #[test]
    fn file_keys_are_camel_case() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::at(dir.path().join("settings.json"));
        store.save(&MonitorConfig::default()).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("\"monitoredApps\""));
        assert!(content.contains("\"startPort\""));
        assert!(content.contains("\"startApiOnStartup\""));
    }

    /// Test that a malformed file surfaces a settings error
    #[test]
    fn malformed_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json {").unwrap();

        let store = SettingsStore::at(path);
        assert!(store.load().is_err());
    }

    /// Test that load applies validation to stored values
    #[test]
    fn load_validates_stored_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"startPort": 6000, "endPort": 0, "quitList": {"Safari": 0.0}}"#,
        )
        .unwrap();

        let store = SettingsStore::at(path);
        let config = store.load().unwrap();
        assert_eq!(config.end_port, 6010);
        assert!(config.quit_list.is_empty());
    }
}
