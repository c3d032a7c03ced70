//! Device tracking - cameras and microphones, in-use transition detection

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::providers::{DeviceSession, DiscoveredDevice};

/// Class of capture device tracked by a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Camera,
    Microphone,
}

impl DeviceKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Camera => "Camera",
            Self::Microphone => "Microphone",
        }
    }
}

/// Wire view of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub in_use: bool,
    pub connected: bool,
}

/// An in-use transition observed during a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub kind: DeviceKind,
    pub name: String,
    pub in_use: bool,
}

impl DeviceEvent {
    /// Payload pushed to subscribed control connections
    pub fn payload(&self) -> serde_json::Value {
        json!({
            (self.kind.label()): {
                "deviceName": self.name,
                "inUse": self.in_use,
            }
        })
    }

    /// Title and body for the desktop notification
    pub fn notification(&self) -> (String, String) {
        let title = format!("{}: {}", self.kind.label(), self.name);
        let body = if self.in_use {
            "changed to In Use"
        } else {
            "changed to Not In Use"
        };
        (title, body.to_string())
    }
}

struct DeviceRecord {
    info: DeviceInfo,
    connection_id: Option<u32>,
}

/// Registry of devices of one class
///
/// Each `refresh` merges a fresh enumeration with the known set. Devices
/// that drop out of the enumeration stay listed with their last known
/// in-use state so a flaky connection does not spray transitions.
pub struct DeviceRegistry {
    kind: DeviceKind,
    devices: HashMap<String, DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            devices: HashMap::new(),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Merge an enumeration, probe in-use state, and report transitions.
    ///
    /// Events fire exactly on an in-use boundary; steady state and
    /// connection flips only log. In-use is probed only for devices
    /// with a live connection handle; a skipped or failed probe keeps
    /// the previous in-use value and emits nothing.
    pub fn refresh(
        &mut self,
        discovered: Vec<DiscoveredDevice>,
        session: &dyn DeviceSession,
    ) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for device in &discovered {
            seen.insert(device.name.clone());

            let record = self
                .devices
                .entry(device.name.clone())
                .or_insert_with(|| {
                    info!("{} discovered: {}", self.kind.label(), device.name);
                    DeviceRecord {
                        info: DeviceInfo {
                            name: device.name.clone(),
                            in_use: false,
                            connected: device.connected,
                        },
                        connection_id: device.connection_id,
                    }
                });

            if record.info.connected != device.connected {
                info!(
                    "{} {} {}",
                    self.kind.label(),
                    device.name,
                    if device.connected {
                        "connected"
                    } else {
                        "disconnected"
                    }
                );
                record.info.connected = device.connected;
            }
            record.connection_id = device.connection_id;

            // Only devices with a live connection handle can be probed;
            // the rest keep their last known in-use state.
            if record.connection_id.is_none() || !record.info.connected {
                continue;
            }

            match session.probe_in_use(device) {
                Ok(in_use) => {
                    if record.info.in_use != in_use {
                        record.info.in_use = in_use;
                        events.push(DeviceEvent {
                            kind: self.kind,
                            name: device.name.clone(),
                            in_use,
                        });
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to probe {} {}: {}",
                        self.kind.label(),
                        device.name,
                        e
                    );
                }
            }
        }

        for (name, record) in self.devices.iter_mut() {
            if !seen.contains(name) && record.info.connected {
                info!("{} {} disconnected", self.kind.label(), name);
                record.info.connected = false;
                record.connection_id = None;
            }
        }

        events
    }

    /// All known devices, ascending by name
    pub fn snapshot(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<DeviceInfo> =
            self.devices.values().map(|r| r.info.clone()).collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    /// Probe stub scripting per-device in-use answers
    struct FakeSession {
        in_use: HashMap<String, bool>,
        failing: HashSet<String>,
    }

    impl FakeSession {
        fn new() -> Self {
            Self {
                in_use: HashMap::new(),
                failing: HashSet::new(),
            }
        }

        fn set(&mut self, name: &str, in_use: bool) {
            self.in_use.insert(name.to_string(), in_use);
        }

        fn fail(&mut self, name: &str) {
            self.failing.insert(name.to_string());
        }
    }

    impl DeviceSession for FakeSession {
        fn discover(&mut self) -> Result<Vec<DiscoveredDevice>> {
            Ok(Vec::new())
        }

        fn probe_in_use(&self, device: &DiscoveredDevice) -> Result<bool> {
            if self.failing.contains(&device.name) {
                return Err(crate::error::GuardianError::provider("probe failed"));
            }
            Ok(*self.in_use.get(&device.name).unwrap_or(&false))
        }
    }

    fn device(name: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            name: name.to_string(),
            connected: true,
            connection_id: Some(7),
        }
    }

    #[test]
    fn transition_fires_once_then_stays_quiet() {
        let mut registry = DeviceRegistry::new(DeviceKind::Microphone);
        let mut session = FakeSession::new();

        let events = registry.refresh(vec![device("Built-in Mic")], &session);
        assert!(events.is_empty());

        session.set("Built-in Mic", true);
        let events = registry.refresh(vec![device("Built-in Mic")], &session);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Built-in Mic");
        assert!(events[0].in_use);

        // still in use: steady state, no repeat
        let events = registry.refresh(vec![device("Built-in Mic")], &session);
        assert!(events.is_empty());

        session.set("Built-in Mic", false);
        let events = registry.refresh(vec![device("Built-in Mic")], &session);
        assert_eq!(events.len(), 1);
        assert!(!events[0].in_use);
    }

    #[test]
    fn failed_probe_keeps_state_and_emits_nothing() {
        let mut registry = DeviceRegistry::new(DeviceKind::Camera);
        let mut session = FakeSession::new();
        session.set("FaceTime HD", true);

        registry.refresh(vec![device("FaceTime HD")], &session);
        assert!(registry.snapshot()[0].in_use);

        session.fail("FaceTime HD");
        let events = registry.refresh(vec![device("FaceTime HD")], &session);
        assert!(events.is_empty());
        assert!(registry.snapshot()[0].in_use);
    }

    #[test]
    fn device_without_live_connection_is_not_probed() {
        let mut registry = DeviceRegistry::new(DeviceKind::Camera);
        let mut session = FakeSession::new();
        session.set("FaceTime HD", true);

        registry.refresh(vec![device("FaceTime HD")], &session);
        assert!(registry.snapshot()[0].in_use);

        // re-enumerated with no connection handle; the probe would answer
        // false, but a handle-less device keeps its last known state
        session.set("FaceTime HD", false);
        let gone = DiscoveredDevice {
            name: "FaceTime HD".into(),
            connected: false,
            connection_id: None,
        };
        let events = registry.refresh(vec![gone], &session);

        assert!(events.is_empty());
        let snapshot = registry.snapshot();
        assert!(!snapshot[0].connected);
        assert!(snapshot[0].in_use);
    }

    #[test]
    fn vanished_device_stays_listed_as_disconnected() {
        let mut registry = DeviceRegistry::new(DeviceKind::Camera);
        let mut session = FakeSession::new();
        session.set("FaceTime HD", true);

        registry.refresh(vec![device("FaceTime HD")], &session);
        let events = registry.refresh(Vec::new(), &session);

        assert!(events.is_empty());
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot[0].connected);
        assert!(snapshot[0].in_use);
    }

    #[test]
    fn snapshot_sorts_ascending_by_name() {
        let mut registry = DeviceRegistry::new(DeviceKind::Camera);
        let session = FakeSession::new();

        registry.refresh(
            vec![device("Webcam C920"), device("FaceTime HD"), device("ATEM Mini")],
            &session,
        );

        let names: Vec<String> = registry.snapshot().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["ATEM Mini", "FaceTime HD", "Webcam C920"]);
    }

    #[test]
    fn update_payload_is_tagged_by_device_class() {
        let event = DeviceEvent {
            kind: DeviceKind::Camera,
            name: "FaceTime HD".into(),
            in_use: true,
        };

        assert_eq!(
            event.payload(),
            serde_json::json!({"Camera": {"deviceName": "FaceTime HD", "inUse": true}})
        );

        let (title, body) = event.notification();
        assert_eq!(title, "Camera: FaceTime HD");
        assert_eq!(body, "changed to In Use");
    }
}
