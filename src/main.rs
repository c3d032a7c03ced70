//! OverSight Guardian - monitoring daemon with a local control server
//!
//! Polls monitored applications, capture devices, and system resources on
//! a fixed cycle, enforces per-app RAM quit thresholds, and answers
//! JSON-RPC queries over a local TCP port.

use std::sync::Arc;

use anyhow::Result;
use single_instance::SingleInstance;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use oversight_guardian::core::{
    MonitorConfig, MonitorScheduler, MonitorState, ProviderSet, SharedConfig,
};
use oversight_guardian::notifier::DesktopNotifier;
use oversight_guardian::persistence::SettingsStore;
use oversight_guardian::platform::SystemProcessControl;
use oversight_guardian::server::{ApiHandler, ControlServer};
use oversight_guardian::{APP_NAME, APP_VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("{} v{} starting...", APP_NAME, APP_VERSION);
    if oversight_guardian::is_sandboxed() {
        info!("Sandboxed build; closeApp is disabled");
    }

    // Ensure only one guardian runs per user session
    let instance = SingleInstance::new(APP_NAME).expect("Failed to create single instance lock");
    if !instance.is_single() {
        error!("Another instance of {} is already running!", APP_NAME);
        return Ok(());
    }

    // Settings: load, write the default file on first run, watch for edits
    let store = SettingsStore::default_location();
    let initial = match store.load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load settings: {}, using defaults", e);
            let mut config = MonitorConfig::default();
            config.validate();
            config
        }
    };
    if !store.path().exists() {
        if let Err(e) = store.save(&initial) {
            warn!("Could not write default settings file: {}", e);
        }
    }
    let config = SharedConfig::new(initial);
    let _watcher = match store.watch(config.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("Settings watcher unavailable: {}", e);
            None
        }
    };

    let (shutdown, _) = tokio::sync::broadcast::channel(4);

    let state = MonitorState::new(
        config.clone(),
        Arc::new(SystemProcessControl),
        Arc::new(DesktopNotifier),
    );

    let mut providers = ProviderSet::detect();
    match providers.storage.root_volume() {
        Ok(volume) => info!(
            "Root volume: {:.1} GB free of {:.1} GB",
            volume.available_bytes as f64 / 1e9,
            volume.total_bytes as f64 / 1e9
        ),
        Err(e) => warn!("Could not read root volume: {}", e),
    }

    let scheduler = MonitorScheduler::new(state.clone(), providers);
    let scheduler_shutdown = shutdown.subscribe();
    let monitor_handle = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    let snapshot = config.snapshot();
    if snapshot.start_api_on_startup {
        let server =
            ControlServer::bind(snapshot.start_port, snapshot.end_port, shutdown.clone()).await?;
        let handler = Arc::new(ApiHandler::new(state.clone(), server.state()));
        let updates = state.updates.clone();
        let server_handle = tokio::spawn(async move {
            server.run(handler, updates).await;
        });

        let mut shutdown_rx = shutdown.subscribe();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                let _ = shutdown.send(());
            }
            _ = shutdown_rx.recv() => {}
        }
        let _ = server_handle.await;
    } else {
        info!("Control server disabled by settings");
        tokio::signal::ctrl_c().await?;
        info!("Interrupt received, shutting down");
        let _ = shutdown.send(());
    }

    let _ = monitor_handle.await;
    info!("{} shutting down", APP_NAME);
    Ok(())
}

/// Initialize the logging system
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("oversight_guardian=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
