//! Host status sampling.
//!
//! CPU load is `1 - idle/total` per core over the cumulative tick counters
//! the kernel exposes in `/proc/stat`, averaged across cores. Hosts without
//! those counters fall back to sysinfo's per-refresh usage, refreshed at most
//! once per [`CPU_REFRESH_FLOOR`] and cached in between.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::System;
use tracing::debug;

use crate::types::SystemSnapshot;

const PROC_STAT: &str = "/proc/stat";

/// Minimum spacing between two sysinfo CPU refreshes. Closer refreshes
/// report zero usage.
pub const CPU_REFRESH_FLOOR: Duration = Duration::from_millis(250);

/// Cumulative scheduler ticks for one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreTicks {
    pub idle: u64,
    pub total: u64,
}

struct Host {
    system: System,
    cpu_refreshed: Instant,
    cpu_cached: f64,
}

/// Samples CPU, memory and process uptime on demand.
///
/// Cheap to clone; clones share one `System` handle and one CPU cache.
#[derive(Clone)]
pub struct SystemSampler {
    host: Arc<Mutex<Host>>,
    tick_source: Option<PathBuf>,
    started: Instant,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self::with_tick_source(Some(PathBuf::from(PROC_STAT)))
    }

    /// Read core ticks from `path` (a `/proc/stat` layout), or only use
    /// sysinfo when `None`.
    pub fn with_tick_source(tick_source: Option<PathBuf>) -> Self {
        let mut system = System::new();
        // Baseline for the sysinfo fallback.
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            host: Arc::new(Mutex::new(Host {
                system,
                cpu_refreshed: Instant::now(),
                cpu_cached: 0.0,
            })),
            tick_source,
            started: Instant::now(),
        }
    }

    /// Take a fresh snapshot, tagged with the given last block.
    pub fn sample(&self, last_block: u64) -> SystemSnapshot {
        let ticks = self.read_ticks();

        let (cpu, memory) = {
            let mut host = self.host.lock();
            host.system.refresh_memory();
            let memory =
                memory_used_percent(host.system.total_memory(), host.system.free_memory());
            let cpu = match ticks {
                Some(cores) => busy_percent(&cores),
                None => host.fallback_cpu(),
            };
            (cpu, memory)
        };

        SystemSnapshot {
            cpu_usage_percent: cpu,
            memory_usage_percent: memory,
            uptime_seconds: self.started.elapsed().as_secs(),
            last_block,
        }
    }

    fn read_ticks(&self) -> Option<Vec<CoreTicks>> {
        let path = self.tick_source.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let cores = parse_core_ticks(&text);
                (!cores.is_empty()).then_some(cores)
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "CPU tick counters unavailable");
                None
            }
        }
    }
}

impl Host {
    fn fallback_cpu(&mut self) -> f64 {
        if self.cpu_refreshed.elapsed() >= CPU_REFRESH_FLOOR {
            self.system.refresh_cpu();
            self.cpu_refreshed = Instant::now();
            let per_core: Vec<f32> = self.system.cpus().iter().map(|c| c.cpu_usage()).collect();
            self.cpu_cached = average_cpu_percent(&per_core);
        }
        self.cpu_cached
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSampler")
            .field("tick_source", &self.tick_source)
            .field("uptime_secs", &self.started.elapsed().as_secs())
            .finish()
    }
}

/// Per-core tick counters from a `/proc/stat` document.
///
/// Only `cpuN` rows count (the aggregate `cpu` row is skipped). Total is
/// user + nice + system + idle + irq; idle is the idle column alone.
pub fn parse_core_ticks(text: &str) -> Vec<CoreTicks> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let label = fields.next()?;
            let core = label.strip_prefix("cpu")?;
            if core.is_empty() || !core.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let values: Vec<u64> = fields.map_while(|f| f.parse().ok()).collect();
            let [user, nice, system, idle, _iowait, irq, ..] = values[..] else {
                return None;
            };
            Some(CoreTicks {
                idle,
                total: user + nice + system + idle + irq,
            })
        })
        .collect()
}

/// Mean of `(1 - idle/total) * 100` across cores, one decimal.
pub fn busy_percent(cores: &[CoreTicks]) -> f64 {
    if cores.is_empty() {
        return 0.0;
    }
    let sum: f64 = cores
        .iter()
        .map(|core| {
            if core.total == 0 {
                0.0
            } else {
                (1.0 - core.idle as f64 / core.total as f64) * 100.0
            }
        })
        .sum();
    round_one_decimal(sum / cores.len() as f64)
}

/// Mean busy percentage across cores, one decimal. Zero cores reads as idle.
pub fn average_cpu_percent(per_core: &[f32]) -> f64 {
    if per_core.is_empty() {
        return 0.0;
    }
    let sum: f64 = per_core.iter().map(|&c| f64::from(c)).sum();
    round_one_decimal(sum / per_core.len() as f64)
}

/// `(total - free) / total` as a percentage, one decimal.
pub fn memory_used_percent(total: u64, free: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let used = total.saturating_sub(free) as f64;
    round_one_decimal(used / total as f64 * 100.0)
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
