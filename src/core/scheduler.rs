//! The poll cycle - one periodic timer driving every registry

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use super::apps::AppEvent;
use super::devices::DeviceRegistry;
use super::providers::{DeviceSession, ProviderSet};
use super::state::MonitorState;

/// Seconds between poll cycles
pub const POLL_INTERVAL_SECS: u64 = 5;

/// Owns the providers and drives one poll cycle per tick
///
/// Each tick runs the full cycle inline before the next one is armed, so
/// cycles never overlap even when a termination verification runs long.
pub struct MonitorScheduler {
    state: MonitorState,
    providers: ProviderSet,
}

impl MonitorScheduler {
    pub fn new(state: MonitorState, providers: ProviderSet) -> Self {
        Self { state, providers }
    }

    /// Run poll cycles until the shutdown channel fires
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(POLL_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cycle().await;
                }
                _ = shutdown.recv() => {
                    debug!("Monitoring loop stopping");
                    break;
                }
            }
        }
    }

    /// One poll cycle across apps, devices, and resources
    ///
    /// Every sub-poll is isolated: a failing provider logs and the rest
    /// of the cycle still runs.
    pub async fn cycle(&mut self) {
        let config = self.state.config.snapshot();
        let token = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        if config.monitor_open_apps {
            match self.providers.processes.running_apps() {
                Ok(running) => {
                    let events = self.state.apps.write().await.poll(
                        &running,
                        &config,
                        self.state.control.as_ref(),
                        &token,
                    );
                    for event in events {
                        match event {
                            AppEvent::ThresholdQuit { name } => {
                                if config.notifications {
                                    self.state.notifier.notify(
                                        &format!("{} exceeded usage", name),
                                        "Attempting to quit",
                                    );
                                }
                            }
                        }
                    }
                }
                Err(e) => warn!("Process enumeration failed: {}", e),
            }
        }

        if config.monitor_cameras {
            Self::refresh_device_class(
                &self.state,
                Arc::clone(&self.state.cameras),
                self.providers.cameras.as_mut(),
                config.notifications,
            )
            .await;
        }

        if config.monitor_microphones {
            Self::refresh_device_class(
                &self.state,
                Arc::clone(&self.state.microphones),
                self.providers.microphones.as_mut(),
                config.notifications,
            )
            .await;
        }

        if config.monitor_cpu {
            if let Some(cpu) = self.providers.cpu.as_mut() {
                match cpu.core_ticks() {
                    Ok(sample) => self.state.resources.write().await.update_cpu(sample),
                    Err(e) => warn!("CPU sample failed: {}", e),
                }
            }
        }

        if config.monitor_ram {
            if let Some(memory) = self.providers.memory.as_mut() {
                match memory.page_counts() {
                    Ok(pages) => self.state.resources.write().await.update_memory(pages),
                    Err(e) => warn!("Memory sample failed: {}", e),
                }
            }
        }

        if config.monitor_battery {
            match self.providers.battery.read() {
                Ok(snapshot) => self.state.resources.write().await.update_battery(snapshot),
                Err(e) => warn!("Battery read failed: {}", e),
            }
        }

        match self.providers.storage.root_volume() {
            Ok(volume) => self.state.resources.write().await.update_volume(volume),
            Err(e) => warn!("Volume stats failed: {}", e),
        }
    }

    /// Discover one device class, diff it, and fan out transitions
    async fn refresh_device_class(
        state: &MonitorState,
        registry: Arc<RwLock<DeviceRegistry>>,
        session: &mut dyn DeviceSession,
        notify: bool,
    ) {
        let kind = registry.read().await.kind();
        let discovered = match session.discover() {
            Ok(discovered) => discovered,
            Err(e) => {
                warn!("{} discovery failed: {}", kind.label(), e);
                return;
            }
        };

        let events = registry.write().await.refresh(discovered, &*session);
        for event in events {
            state.broadcast(event.payload());
            if notify {
                let (title, body) = event.notification();
                state.notifier.notify(&title, &body);
            }
        }
    }
}
