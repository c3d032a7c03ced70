//! Application monitoring - snapshots, lifecycle phases, quit/reopen machinery

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::config::MonitorConfig;
use super::providers::RunningApp;
use crate::platform::ProcessControl;

/// Lifecycle phase of a tracked application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppPhase {
    /// Not yet observed running
    Unknown,
    /// Seen in the latest enumeration
    Open,
    /// Asked to terminate; outcome verified next cycle
    Quitting,
    /// Force-terminated; outcome verified next cycle
    ForceQuitting,
    /// Confirmed gone
    Closed,
}

impl AppPhase {
    /// Whether a terminate action is still outstanding
    pub fn is_terminating(&self) -> bool {
        matches!(self, Self::Quitting | Self::ForceQuitting)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Open => "Open",
            Self::Quitting => "Quitting",
            Self::ForceQuitting => "Force Quitting",
            Self::Closed => "Closed",
        }
    }
}

/// Point-in-time view of one monitored application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSnapshot {
    pub name: String,
    /// Reserved; always -1 in this design
    pub cpu_usage: Option<f64>,
    /// Resident memory in MB, -1 when unknown
    pub ram_usage: f64,
    /// Timestamp token of the cycle that last saw the app running
    pub start_time: String,
    pub quit_automatically: bool,
    #[serde(rename = "quitMB")]
    pub quit_threshold_mb: f64,
    pub open: bool,
}

impl AppSnapshot {
    /// Entry for a monitored app that has never been seen running
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cpu_usage: Some(-1.0),
            ram_usage: -1.0,
            start_time: String::new(),
            quit_automatically: false,
            quit_threshold_mb: 0.0,
            open: false,
        }
    }
}

/// Event worth surfacing from a poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// An app crossed its RAM threshold and was asked to quit
    ThresholdQuit { name: String },
}

/// A queued closeApp request, completed when a cycle has consumed it
struct QuitRequest {
    names: Vec<String>,
    done: oneshot::Sender<()>,
}

/// Registry of running and monitored applications
///
/// One `poll` call is one cycle: it enumerates running apps, issues any
/// pending terminations, drains queued reopen actions, and verifies the
/// terminations issued by the previous cycle.
pub struct AppRegistry {
    /// Snapshot per monitored app name
    monitored: HashMap<String, AppSnapshot>,
    /// Lifecycle phase per app the registry has acted on or tracked
    phases: HashMap<String, AppPhase>,
    /// Deduplicated running app names, case-insensitive ascending
    open_apps: Vec<String>,
    /// SIGTERM issued this cycle, verified next cycle
    quitting: HashMap<String, u32>,
    /// SIGKILL issued this cycle, verified next cycle
    force_quitting: HashMap<String, u32>,
    /// Apps to relaunch, drained one cycle after they are queued
    reopen_queue: VecDeque<String>,
    /// closeApp requests waiting for the next cycle
    pending_requests: Vec<QuitRequest>,
    /// Timestamp token of the latest completed cycle
    latest_token: String,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self {
            monitored: HashMap::new(),
            phases: HashMap::new(),
            open_apps: Vec::new(),
            quitting: HashMap::new(),
            force_quitting: HashMap::new(),
            reopen_queue: VecDeque::new(),
            pending_requests: Vec::new(),
            latest_token: String::new(),
        }
    }

    /// Queue termination requests; the returned channel resolves once the
    /// next cycle has consumed them.
    pub fn request_terminate(&mut self, names: Vec<String>) -> oneshot::Receiver<()> {
        let (done, rx) = oneshot::channel();
        self.pending_requests.push(QuitRequest { names, done });
        rx
    }

    /// Run one poll cycle against a fresh process enumeration
    pub fn poll(
        &mut self,
        running: &[RunningApp],
        config: &MonitorConfig,
        control: &dyn ProcessControl,
        token: &str,
    ) -> Vec<AppEvent> {
        let mut events = Vec::new();

        // Counts and buckets are fixed up front: entries queued during this
        // cycle belong to the next one.
        let reopen_count = self.reopen_queue.len();
        let before_quitting = std::mem::take(&mut self.quitting);
        let before_force_quitting = std::mem::take(&mut self.force_quitting);

        let requests = std::mem::take(&mut self.pending_requests);
        let mut api_quit: HashSet<String> = HashSet::new();
        let mut completions = Vec::new();
        for request in requests {
            api_quit.extend(request.names);
            completions.push(request.done);
        }

        // Deduplicate by name, first instance wins
        let mut seen: HashMap<String, (u32, f64)> = HashMap::new();
        for app in running {
            seen.entry(app.name.clone())
                .or_insert((app.pid, app.memory_mb));
        }
        let mut names: Vec<String> = seen.keys().cloned().collect();
        names.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));

        for name in &names {
            let (pid, memory_mb) = seen[name];
            let mut continue_monitoring = true;

            if api_quit.contains(name) {
                continue_monitoring = false;
                let already_pending = self.quitting.contains_key(name)
                    || before_quitting.contains_key(name)
                    || before_force_quitting.contains_key(name);
                if !already_pending {
                    info!("Quit requested over API for {}", name);
                    match control.terminate(pid) {
                        Ok(()) => {
                            self.quitting.insert(name.clone(), pid);
                            self.phases.insert(name.clone(), AppPhase::Quitting);
                        }
                        Err(e) => warn!("Failed to terminate {}: {}", name, e),
                    }
                }
            }

            if config.is_monitored(name) && continue_monitoring {
                let threshold = config.quit_threshold(name);

                if let Some(threshold) = threshold {
                    let already_pending = self.quitting.contains_key(name)
                        || before_quitting.contains_key(name)
                        || before_force_quitting.contains_key(name);
                    if memory_mb >= threshold && !already_pending {
                        info!(
                            "{} exceeded its threshold ({:.1} MB >= {:.1} MB), quitting",
                            name, memory_mb, threshold
                        );
                        events.push(AppEvent::ThresholdQuit { name: name.clone() });
                        match control.terminate(pid) {
                            Ok(()) => {
                                self.quitting.insert(name.clone(), pid);
                                self.phases.insert(name.clone(), AppPhase::Quitting);
                            }
                            Err(e) => warn!("Failed to terminate {}: {}", name, e),
                        }
                    }
                }

                self.monitored.insert(
                    name.clone(),
                    AppSnapshot {
                        name: name.clone(),
                        cpu_usage: Some(-1.0),
                        ram_usage: memory_mb,
                        start_time: token.to_string(),
                        quit_automatically: threshold.is_some(),
                        quit_threshold_mb: threshold.unwrap_or(0.0),
                        open: true,
                    },
                );
                if !self
                    .phases
                    .get(name)
                    .map(|phase| phase.is_terminating())
                    .unwrap_or(false)
                {
                    self.phases.insert(name.clone(), AppPhase::Open);
                }
            }
        }

        // Keep the snapshot table aligned with the configured list: seed
        // never-seen apps, drop ones no longer monitored, and clear the
        // open flag on anything the enumeration did not refresh.
        self.monitored
            .retain(|name, _| config.is_monitored(name));
        for name in &config.monitored_apps {
            self.monitored
                .entry(name.clone())
                .or_insert_with(|| AppSnapshot::placeholder(name.clone()));
        }
        for snapshot in self.monitored.values_mut() {
            snapshot.open = snapshot.start_time == token;
        }

        self.open_apps = names;
        self.latest_token = token.to_string();

        // Reopen actions queued by earlier cycles, a fixed count of them
        for _ in 0..reopen_count {
            let name = match self.reopen_queue.pop_front() {
                Some(name) => name,
                None => break,
            };
            match config.reopen_path(&name) {
                Some(path) => {
                    info!("Reopening {} from {}", name, path);
                    if let Err(e) = control.launch(path) {
                        warn!("Failed to reopen {}: {}", name, e);
                    }
                }
                None => warn!("No reopen path configured for {}", name),
            }
        }

        // Verify last cycle's force terminations
        for (name, pid) in before_force_quitting {
            if control.is_running(pid) {
                warn!(
                    "Could not force terminate {}, will have to terminate manually.",
                    name
                );
                self.phases.insert(name, AppPhase::Open);
            } else {
                info!("{} force terminated", name);
                self.finish_termination(name, config);
            }
        }

        // Verify last cycle's terminations, escalating the stubborn ones
        for (name, pid) in before_quitting {
            if control.is_running(pid) {
                info!("{} did not quit, force terminating", name);
                match control.force_terminate(pid) {
                    Ok(()) => {
                        self.force_quitting.insert(name.clone(), pid);
                        self.phases.insert(name, AppPhase::ForceQuitting);
                    }
                    Err(e) => {
                        warn!("Failed to force terminate {}: {}", name, e);
                        self.phases.insert(name, AppPhase::Open);
                    }
                }
            } else {
                info!("{} terminated", name);
                self.finish_termination(name, config);
            }
        }

        // Phase entries only matter for monitored apps and in-flight
        // terminations; drop the rest so API quits do not accumulate.
        self.phases
            .retain(|name, phase| config.is_monitored(name) || phase.is_terminating());

        for done in completions {
            let _ = done.send(());
        }

        events
    }

    /// Record a confirmed termination and queue its reopen when configured.
    ///
    /// Only terminations this registry issued reach here, so manual
    /// closures never trigger a reopen.
    fn finish_termination(&mut self, name: String, config: &MonitorConfig) {
        if config.reopen_path(&name).is_some() {
            self.reopen_queue.push_back(name.clone());
        }
        self.phases.insert(name, AppPhase::Closed);
    }

    /// Snapshots of all monitored apps, case-insensitive ascending by name
    pub fn snapshot(&self) -> Vec<AppSnapshot> {
        let mut snapshots: Vec<AppSnapshot> = self.monitored.values().cloned().collect();
        snapshots.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        snapshots
    }

    /// Names of all running apps, case-insensitive ascending
    pub fn open_apps(&self) -> Vec<String> {
        self.open_apps.clone()
    }

    /// Lifecycle phase for an app name
    pub fn phase(&self, name: &str) -> AppPhase {
        self.phases.get(name).copied().unwrap_or(AppPhase::Unknown)
    }

    /// Number of queued reopen actions
    pub fn queued_reopens(&self) -> usize {
        self.reopen_queue.len()
    }

    /// Timestamp token of the latest completed cycle
    pub fn latest_token(&self) -> &str {
        &self.latest_token
    }
}

impl Default for AppRegistry {
    fn default() -> Self {
        Self::new()
    }
}
