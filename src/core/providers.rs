//! Metric providers - pluggable sources for OS-level readings
//!
//! The registries and the resource monitor never talk to the operating
//! system directly; they consume plain snapshots produced by the traits
//! below. Default sources cover what the host can report portably, and
//! anything platform-bound can be swapped in by the embedding application.

use tracing::warn;

use super::resources::{BatterySnapshot, VolumeStats};
use crate::error::{GuardianError, Result};

/// A running application visible to the process provider
#[derive(Debug, Clone)]
pub struct RunningApp {
    pub name: String,
    pub pid: u32,
    /// Resident memory in MB, -1.0 when the provider could not sample it
    pub memory_mb: f64,
}

/// Enumerates running applications with their memory usage
pub trait ProcessSource: Send + Sync {
    fn running_apps(&mut self) -> Result<Vec<RunningApp>>;
}

/// Cumulative scheduler tick counters for one core
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCoreTicks {
    pub user: u64,
    pub system: u64,
    pub idle: u64,
    pub nice: u64,
}

/// Samples raw per-core tick counters
///
/// Counters are cumulative since boot; the resource monitor derives load
/// from deltas between consecutive samples.
pub trait CpuSource: Send + Sync {
    fn core_ticks(&mut self) -> Result<Vec<CpuCoreTicks>>;
}

/// Page-granular memory counters
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryPages {
    /// Page size in bytes
    pub page_size: u64,
    pub wired: u64,
    pub active: u64,
    pub inactive: u64,
    pub compressed: u64,
    /// Pages attributed to applications
    pub app: u64,
}

/// Samples the memory tier page counts
pub trait MemorySource: Send + Sync {
    fn page_counts(&mut self) -> Result<MemoryPages>;
}

/// Reads the battery attribute snapshot; `None` when no battery is fitted
pub trait BatterySource: Send + Sync {
    fn read(&mut self) -> Result<Option<BatterySnapshot>>;
}

/// Reads capacity figures for the root volume
pub trait StorageSource: Send + Sync {
    fn root_volume(&mut self) -> Result<VolumeStats>;
}

/// A device reported by a discovery session
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub name: String,
    pub connected: bool,
    /// Opaque connection handle; absent when the device has no live connection
    pub connection_id: Option<u32>,
}

/// Discovery plus in-use probing for one device class
pub trait DeviceSession: Send + Sync {
    /// List the devices of this class currently known to the OS
    fn discover(&mut self) -> Result<Vec<DiscoveredDevice>>;
    /// Whether a discovered device is actively capturing
    fn probe_in_use(&self, device: &DiscoveredDevice) -> Result<bool>;
}

/// Process enumeration backed by sysinfo
pub struct SysinfoProcessSource {
    system: sysinfo::System,
}

impl SysinfoProcessSource {
    pub fn new() -> Self {
        Self {
            system: sysinfo::System::new(),
        }
    }
}

impl Default for SysinfoProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SysinfoProcessSource {
    fn running_apps(&mut self) -> Result<Vec<RunningApp>> {
        self.system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::All,
            true,
            sysinfo::ProcessRefreshKind::everything(),
        );

        let apps = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let bytes = process.memory();
                RunningApp {
                    name: process.name().to_string_lossy().to_string(),
                    pid: pid.as_u32(),
                    memory_mb: if bytes == 0 {
                        -1.0
                    } else {
                        bytes as f64 / (1024.0 * 1024.0)
                    },
                }
            })
            .collect();
        Ok(apps)
    }
}

/// Battery readings through the cross-platform battery manager
///
/// The manager is rebuilt on every read; it holds non-`Send` state
/// internally, so caching it would pin the source to one thread.
pub struct SystemBatterySource;

impl BatterySource for SystemBatterySource {
    fn read(&mut self) -> Result<Option<BatterySnapshot>> {
        use battery::units::electric_potential::volt;
        use battery::units::energy::watt_hour;
        use battery::units::power::watt;
        use battery::units::ratio::percent;
        use battery::units::thermodynamic_temperature::degree_celsius;
        use battery::units::time::minute;

        let manager = match battery::Manager::new() {
            Ok(manager) => manager,
            Err(e) => {
                warn!("Battery manager unavailable: {}", e);
                return Ok(None);
            }
        };

        let mut batteries = manager
            .batteries()
            .map_err(|e| GuardianError::provider(format!("battery enumeration failed: {}", e)))?;

        let bat = match batteries.next() {
            Some(Ok(bat)) => bat,
            Some(Err(e)) => {
                return Err(GuardianError::provider(format!(
                    "battery read failed: {}",
                    e
                )))
            }
            None => return Ok(None),
        };

        let voltage = bat.voltage().get::<volt>() as f64;
        let rate = bat.energy_rate().get::<watt>() as f64;
        Ok(Some(BatterySnapshot {
            is_charging: bat.state() == battery::State::Charging,
            state: bat.state().to_string(),
            percentage: bat.state_of_charge().get::<percent>() as f64,
            health: bat.state_of_health().get::<percent>() as f64,
            cycle_count: bat.cycle_count(),
            current_capacity: bat.energy().get::<watt_hour>() as f64,
            max_capacity: bat.energy_full().get::<watt_hour>() as f64,
            design_capacity: bat.energy_full_design().get::<watt_hour>() as f64,
            time_to_empty: bat.time_to_empty().map(|t| t.get::<minute>() as f64),
            time_to_full: bat.time_to_full().map(|t| t.get::<minute>() as f64),
            temperature: bat.temperature().map(|t| t.get::<degree_celsius>() as f64),
            voltage,
            amperage: if voltage > 0.0 { rate / voltage } else { 0.0 },
            technology: bat.technology().to_string(),
            vendor: bat.vendor().map(str::to_string),
            model: bat.model().map(str::to_string),
            serial_number: bat.serial_number().map(str::to_string),
        }))
    }
}

/// Root volume capacity backed by sysinfo
pub struct SysinfoStorageSource {
    disks: sysinfo::Disks,
}

impl SysinfoStorageSource {
    pub fn new() -> Self {
        Self {
            disks: sysinfo::Disks::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoStorageSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageSource for SysinfoStorageSource {
    fn root_volume(&mut self) -> Result<VolumeStats> {
        self.disks.refresh();

        let root = self
            .disks
            .iter()
            .find(|disk| disk.mount_point() == std::path::Path::new("/"))
            .or_else(|| self.disks.iter().max_by_key(|disk| disk.total_space()));

        match root {
            Some(disk) => {
                let total = disk.total_space();
                let available = disk.available_space();
                Ok(VolumeStats {
                    total_bytes: total,
                    available_bytes: available,
                    used_bytes: total.saturating_sub(available),
                })
            }
            None => Err(GuardianError::provider("no volumes reported")),
        }
    }
}

/// Per-core tick counters from /proc/stat
#[cfg(target_os = "linux")]
pub struct LinuxCpuSource;

#[cfg(target_os = "linux")]
impl CpuSource for LinuxCpuSource {
    fn core_ticks(&mut self) -> Result<Vec<CpuCoreTicks>> {
        let stat = std::fs::read_to_string("/proc/stat")?;
        let mut cores = Vec::new();
        for line in stat.lines() {
            if !line.starts_with("cpu") || line.starts_with("cpu ") {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                continue;
            }
            cores.push(CpuCoreTicks {
                user: fields[1].parse().unwrap_or(0),
                nice: fields[2].parse().unwrap_or(0),
                system: fields[3].parse().unwrap_or(0),
                idle: fields[4].parse().unwrap_or(0),
            });
        }
        if cores.is_empty() {
            return Err(GuardianError::provider("no per-core lines in /proc/stat"));
        }
        Ok(cores)
    }
}

/// Memory tier page counts from /proc/vmstat
#[cfg(target_os = "linux")]
pub struct LinuxMemorySource {
    page_size: u64,
}

#[cfg(target_os = "linux")]
impl LinuxMemorySource {
    pub fn new() -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u64 };
        Self { page_size }
    }
}

#[cfg(target_os = "linux")]
impl MemorySource for LinuxMemorySource {
    fn page_counts(&mut self) -> Result<MemoryPages> {
        let vmstat = std::fs::read_to_string("/proc/vmstat")?;
        let mut counters = std::collections::HashMap::new();
        for line in vmstat.lines() {
            if let Some((key, value)) = line.split_once(' ') {
                if let Ok(value) = value.trim().parse::<u64>() {
                    counters.insert(key.to_string(), value);
                }
            }
        }
        let get = |key: &str| counters.get(key).copied().unwrap_or(0);
        Ok(MemoryPages {
            page_size: self.page_size,
            wired: get("nr_unevictable"),
            active: get("nr_active_anon") + get("nr_active_file"),
            inactive: get("nr_inactive_anon") + get("nr_inactive_file"),
            compressed: get("nr_zswapped"),
            app: get("nr_anon_pages"),
        })
    }
}

/// Device session that never discovers anything
///
/// Stands in when no discovery backend is wired up for a device class;
/// the registry then simply carries whatever it already knows.
pub struct InertDeviceSession;

impl DeviceSession for InertDeviceSession {
    fn discover(&mut self) -> Result<Vec<DiscoveredDevice>> {
        Ok(Vec::new())
    }

    fn probe_in_use(&self, _device: &DiscoveredDevice) -> Result<bool> {
        Ok(false)
    }
}

/// The full provider bundle consumed by the scheduler
pub struct ProviderSet {
    pub processes: Box<dyn ProcessSource>,
    pub cpu: Option<Box<dyn CpuSource>>,
    pub memory: Option<Box<dyn MemorySource>>,
    pub battery: Box<dyn BatterySource>,
    pub storage: Box<dyn StorageSource>,
    pub cameras: Box<dyn DeviceSession>,
    pub microphones: Box<dyn DeviceSession>,
}

impl ProviderSet {
    /// Build the default sources for the current platform
    pub fn detect() -> Self {
        #[cfg(target_os = "linux")]
        let cpu: Option<Box<dyn CpuSource>> = Some(Box::new(LinuxCpuSource));
        #[cfg(not(target_os = "linux"))]
        let cpu: Option<Box<dyn CpuSource>> = None;

        #[cfg(target_os = "linux")]
        let memory: Option<Box<dyn MemorySource>> = Some(Box::new(LinuxMemorySource::new()));
        #[cfg(not(target_os = "linux"))]
        let memory: Option<Box<dyn MemorySource>> = None;

        if cpu.is_none() {
            warn!("No CPU tick source for this platform; CPU stats will be absent");
        }
        if memory.is_none() {
            warn!("No memory tier source for this platform; memory stats will be absent");
        }

        Self {
            processes: Box::new(SysinfoProcessSource::new()),
            cpu,
            memory,
            battery: Box::new(SystemBatterySource),
            storage: Box::new(SysinfoStorageSource::new()),
            cameras: Box::new(InertDeviceSession),
            microphones: Box::new(InertDeviceSession),
        }
    }
}
