// Kernel counters sysinfo does not expose: aggregate CPU jiffies and per-interface
// error/drop counters. Parsers take file contents; `ProcFs` can point at a fixture tree.

use crate::models::InterfaceStats;
use std::path::{Path, PathBuf};

const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "docker", "br-", "veth", "virbr", "lxc", "flannel", "cni", "cali",
];

/// Aggregate jiffies from the first `cpu ` line of /proc/stat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    pub idle: u64,
}

/// Cumulative counters summed over one class of interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_errors: u64,
    pub rx_drops: u64,
    pub tx_errors: u64,
    pub tx_drops: u64,
}

impl NetCounters {
    fn add(&mut self, other: &NetCounters) {
        self.rx_bytes += other.rx_bytes;
        self.tx_bytes += other.tx_bytes;
        self.rx_errors += other.rx_errors;
        self.rx_drops += other.rx_drops;
        self.tx_errors += other.tx_errors;
        self.tx_drops += other.tx_drops;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetSample {
    pub physical: NetCounters,
    pub virtual_side: NetCounters,
}

pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse().unwrap_or(0))
        .collect();
    if values.len() < 4 {
        return None;
    }
    Some(CpuTimes {
        total: values.iter().sum(),
        idle: values[3],
    })
}

/// Counts per-CPU lines (`cpu0`, `cpu1`, ...) in /proc/stat.
pub fn count_cpu_lines(stat: &str) -> usize {
    stat.lines()
        .filter(|l| {
            l.strip_prefix("cpu")
                .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        })
        .count()
}

/// Usage percent between two samples; `None` when no ticks elapsed.
pub fn cpu_usage_percent(prev: CpuTimes, cur: CpuTimes) -> Option<f64> {
    let total = cur.total.saturating_sub(prev.total);
    if total == 0 {
        return None;
    }
    let idle = cur.idle.saturating_sub(prev.idle).min(total);
    let usage = (total - idle) as f64 / total as f64 * 100.0;
    Some(crate::models::round2(usage.clamp(0.0, 100.0)))
}

pub fn is_virtual_interface(name: &str) -> bool {
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Parses /proc/net/dev, bucketing interfaces into physical and virtual. Loopback is skipped.
pub fn parse_net_dev(content: &str) -> NetSample {
    let mut sample = NetSample::default();
    for line in content.lines() {
        if line.contains('|') {
            continue;
        }
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        let iface = iface.trim();
        if iface.is_empty() || iface == "lo" {
            continue;
        }
        let fields: Vec<u64> = counters
            .split_whitespace()
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        if fields.len() < 12 {
            continue;
        }
        // RX: bytes packets errs drop ... TX (from 8): bytes packets errs drop
        let counters = NetCounters {
            rx_bytes: fields[0],
            rx_errors: fields[2],
            rx_drops: fields[3],
            tx_bytes: fields[8],
            tx_errors: fields[10],
            tx_drops: fields[11],
        };
        if is_virtual_interface(iface) {
            sample.virtual_side.add(&counters);
        } else {
            sample.physical.add(&counters);
        }
    }
    sample
}

/// Bytes-per-second rates and raw error/drop deltas between two readings.
pub fn interface_rates(prev: &NetCounters, cur: &NetCounters, elapsed_secs: f64) -> InterfaceStats {
    if elapsed_secs <= 0.0 {
        return InterfaceStats::default();
    }
    let rate = |p: u64, c: u64| crate::models::round2(c.saturating_sub(p) as f64 / elapsed_secs);
    InterfaceStats {
        download_bytes_per_sec: rate(prev.rx_bytes, cur.rx_bytes),
        upload_bytes_per_sec: rate(prev.tx_bytes, cur.tx_bytes),
        rx_errors: cur.rx_errors.saturating_sub(prev.rx_errors),
        rx_drops: cur.rx_drops.saturating_sub(prev.rx_drops),
        tx_errors: cur.tx_errors.saturating_sub(prev.tx_errors),
        tx_drops: cur.tx_drops.saturating_sub(prev.tx_drops),
    }
}

/// Root of the proc filesystem the sampler reads.
#[derive(Debug, Clone)]
pub struct ProcFs {
    proc_root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcFs {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    fn read(&self, rel: impl AsRef<Path>) -> Option<String> {
        std::fs::read_to_string(self.proc_root.join(rel)).ok()
    }

    pub fn read_cpu_times(&self) -> Option<CpuTimes> {
        parse_cpu_times(&self.read("stat")?)
    }

    /// Logical core count; falls back to the runtime's view, never below 1.
    pub fn core_count(&self) -> usize {
        self.read("stat")
            .map(|s| count_cpu_lines(&s))
            .filter(|&n| n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
    }

    pub fn read_net_sample(&self) -> NetSample {
        self.read("net/dev")
            .map(|s| parse_net_dev(&s))
            .unwrap_or_default()
    }
}
