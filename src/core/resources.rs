//! Resource monitoring - pure transforms over provider samples
//!
//! The monitor never polls anything itself; the scheduler feeds it raw
//! counters and it keeps the latest derived report. A failed sub-poll
//! simply leaves the previous section in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::providers::{CpuCoreTicks, MemoryPages};

/// Derived CPU load figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    /// Share of time spent in user mode, percent across all cores
    pub user: f64,
    /// Share of time spent in system mode, percent across all cores
    pub system: f64,
    /// Idle share, percent across all cores
    pub idle: f64,
    pub core_count: usize,
    /// Busy percentage per core, keyed by core index
    pub cores: BTreeMap<usize, f64>,
}

/// Memory tier breakdown in bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBreakdown {
    pub wired: f64,
    pub active: f64,
    pub inactive: f64,
    pub compressed: f64,
    pub app: f64,
    /// app + wired + compressed
    pub used: f64,
}

/// Battery attribute snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatterySnapshot {
    pub is_charging: bool,
    pub state: String,
    /// Charge level in percent
    pub percentage: f64,
    /// Capacity health in percent of the design capacity
    pub health: f64,
    pub cycle_count: Option<u32>,
    /// Current charge in Wh
    pub current_capacity: f64,
    /// Full-charge capacity in Wh
    pub max_capacity: f64,
    /// Design capacity in Wh
    pub design_capacity: f64,
    /// Minutes until empty, when discharging
    pub time_to_empty: Option<f64>,
    /// Minutes until full, when charging
    pub time_to_full: Option<f64>,
    /// Temperature in degrees Celsius
    pub temperature: Option<f64>,
    pub voltage: f64,
    pub amperage: f64,
    pub technology: String,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
}

/// Root volume capacity in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStats {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
}

/// Latest derived readings, one section per subsystem
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemReport {
    pub cpu: Option<CpuStats>,
    pub memory: Option<MemoryBreakdown>,
    pub battery: Option<BatterySnapshot>,
    pub volume: Option<VolumeStats>,
}

/// Resource monitor that derives load and capacity figures from raw samples
pub struct ResourceMonitor {
    /// Previous per-core tick sample, for delta computation
    prev_ticks: Option<Vec<CpuCoreTicks>>,
    /// Latest derived report
    report: SystemReport,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            prev_ticks: None,
            report: SystemReport::default(),
        }
    }

    /// Fold a fresh per-core tick sample into the report
    ///
    /// Counters are cumulative, so load is the delta against the previous
    /// sample. Deltas clamp to zero on counter wraparound, and a changed
    /// core count discards the stale sample rather than pairing cores that
    /// no longer correspond.
    pub fn update_cpu(&mut self, sample: Vec<CpuCoreTicks>) {
        let deltas: Vec<CpuCoreTicks> = match &self.prev_ticks {
            Some(prev) if prev.len() == sample.len() => sample
                .iter()
                .zip(prev.iter())
                .map(|(cur, old)| CpuCoreTicks {
                    user: cur.user.saturating_sub(old.user),
                    system: cur.system.saturating_sub(old.system),
                    idle: cur.idle.saturating_sub(old.idle),
                    nice: cur.nice.saturating_sub(old.nice),
                })
                .collect(),
            _ => sample.clone(),
        };

        let mut cores = BTreeMap::new();
        let mut total_user = 0u64;
        let mut total_system = 0u64;
        let mut total_time = 0u64;
        for (index, delta) in deltas.iter().enumerate() {
            let busy = delta.user + delta.system + delta.nice;
            let total = busy + delta.idle;
            let pct = if total > 0 {
                busy as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            cores.insert(index, pct);

            total_user += delta.user;
            total_system += delta.system;
            total_time += delta.user + delta.system + delta.idle;
        }

        let (user, system) = if total_time > 0 {
            (
                total_user as f64 / total_time as f64 * 100.0,
                total_system as f64 / total_time as f64 * 100.0,
            )
        } else {
            (0.0, 0.0)
        };

        self.report.cpu = Some(CpuStats {
            user,
            system,
            idle: 100.0 - user - system,
            core_count: deltas.len(),
            cores,
        });
        self.prev_ticks = Some(sample);
    }

    /// Fold a memory page-count sample into the report
    pub fn update_memory(&mut self, pages: MemoryPages) {
        let bytes = |count: u64| (count * pages.page_size) as f64;
        let wired = bytes(pages.wired);
        let compressed = bytes(pages.compressed);
        let app = bytes(pages.app);
        self.report.memory = Some(MemoryBreakdown {
            wired,
            active: bytes(pages.active),
            inactive: bytes(pages.inactive),
            compressed,
            app,
            used: app + wired + compressed,
        });
    }

    /// Replace the battery section; `None` means no battery is fitted
    pub fn update_battery(&mut self, battery: Option<BatterySnapshot>) {
        self.report.battery = battery;
    }

    /// Replace the volume section
    pub fn update_volume(&mut self, volume: VolumeStats) {
        self.report.volume = Some(volume);
    }

    /// Clone the latest report
    pub fn report(&self) -> SystemReport {
        self.report.clone()
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks(user: u64, system: u64, idle: u64, nice: u64) -> CpuCoreTicks {
        CpuCoreTicks {
            user,
            system,
            idle,
            nice,
        }
    }

    #[test]
    fn first_cpu_sample_uses_raw_counters() {
        let mut monitor = ResourceMonitor::new();
        monitor.update_cpu(vec![ticks(30, 10, 60, 0)]);
        let cpu = monitor.report().cpu.unwrap();
        assert_eq!(cpu.core_count, 1);
        assert!((cpu.user - 30.0).abs() < 1e-9);
        assert!((cpu.system - 10.0).abs() < 1e-9);
        assert!((cpu.cores[&0] - 40.0).abs() < 1e-9);
    }

    #[test]
    fn cpu_load_derives_from_deltas() {
        let mut monitor = ResourceMonitor::new();
        monitor.update_cpu(vec![ticks(100, 100, 100, 0)]);
        // 50 user + 25 system + 25 idle ticks elapsed
        monitor.update_cpu(vec![ticks(150, 125, 125, 0)]);
        let cpu = monitor.report().cpu.unwrap();
        assert!((cpu.user - 50.0).abs() < 1e-9);
        assert!((cpu.system - 25.0).abs() < 1e-9);
        assert!((cpu.idle - 25.0).abs() < 1e-9);
        assert!((cpu.cores[&0] - 75.0).abs() < 1e-9);
    }

    #[test]
    fn cpu_counter_wraparound_clamps_to_zero() {
        let mut monitor = ResourceMonitor::new();
        monitor.update_cpu(vec![ticks(1000, 1000, 1000, 0)]);
        // user counter went backwards; its delta must clamp, not underflow
        monitor.update_cpu(vec![ticks(500, 1050, 1050, 0)]);
        let cpu = monitor.report().cpu.unwrap();
        assert!((cpu.user - 0.0).abs() < 1e-9);
        assert!((cpu.system - 50.0).abs() < 1e-9);
        assert!((cpu.cores[&0] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn core_count_change_discards_previous_sample() {
        let mut monitor = ResourceMonitor::new();
        monitor.update_cpu(vec![ticks(100, 0, 100, 0), ticks(100, 0, 100, 0)]);
        monitor.update_cpu(vec![ticks(25, 25, 50, 0)]);
        let cpu = monitor.report().cpu.unwrap();
        assert_eq!(cpu.core_count, 1);
        // absolute counters again, not deltas against the two-core sample
        assert!((cpu.user - 25.0).abs() < 1e-9);
        assert!((cpu.cores[&0] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn zero_total_time_yields_zero_load() {
        let mut monitor = ResourceMonitor::new();
        monitor.update_cpu(vec![ticks(10, 10, 10, 0)]);
        monitor.update_cpu(vec![ticks(10, 10, 10, 0)]);
        let cpu = monitor.report().cpu.unwrap();
        assert_eq!(cpu.user, 0.0);
        assert_eq!(cpu.cores[&0], 0.0);
    }

    #[test]
    fn memory_tiers_multiply_page_size() {
        let mut monitor = ResourceMonitor::new();
        monitor.update_memory(MemoryPages {
            page_size: 4096,
            wired: 10,
            active: 20,
            inactive: 30,
            compressed: 5,
            app: 40,
        });
        let memory = monitor.report().memory.unwrap();
        assert_eq!(memory.wired, 40960.0);
        assert_eq!(memory.active, 81920.0);
        assert_eq!(memory.used, (40 + 10 + 5) as f64 * 4096.0);
    }

    #[test]
    fn failed_subpoll_keeps_previous_section() {
        let mut monitor = ResourceMonitor::new();
        monitor.update_volume(VolumeStats {
            total_bytes: 100,
            available_bytes: 40,
            used_bytes: 60,
        });
        // no further volume updates; the report still carries the last one
        monitor.update_cpu(vec![ticks(1, 1, 1, 0)]);
        assert!(monitor.report().volume.is_some());
    }
}
