// CPU, memory and combined system snapshot models

use serde::{Deserialize, Serialize};

use super::{DiskInfo, NetworkReport, ProcessInfo};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub usage_percent: f64,
    pub core_count: usize,
    pub temperature: f64,
    /// False when no thermal sensor could be read; `temperature` is then meaningless.
    pub temperature_available: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub disks: Vec<DiskInfo>,
    pub network: NetworkReport,
    #[serde(rename = "uptimeSeconds")]
    pub uptime_secs: u64,
}

/// Published on every sampler tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEvent {
    pub system: SystemStats,
    pub processes: Vec<ProcessInfo>,
}
