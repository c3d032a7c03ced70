//! Core module - registries, poll cycle, and shared monitoring state

pub mod apps;
pub mod config;
pub mod devices;
pub mod providers;
pub mod resources;
pub mod scheduler;
pub mod state;

pub use apps::{AppEvent, AppPhase, AppRegistry, AppSnapshot};
pub use config::{MonitorConfig, SharedConfig};
pub use devices::{DeviceEvent, DeviceInfo, DeviceKind, DeviceRegistry};
pub use providers::ProviderSet;
pub use resources::{ResourceMonitor, SystemReport};
pub use scheduler::{MonitorScheduler, POLL_INTERVAL_SECS};
pub use state::MonitorState;
