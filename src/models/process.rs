// Per-process resource usage

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: i32,
    pub name: String,
    /// EMA-smoothed, normalized to all cores (0-100).
    pub cpu_percent: f64,
    #[serde(rename = "memoryMB")]
    pub memory_mb: f64,
    pub memory_percent: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
}

impl ProcessInfo {
    /// Ranking score: CPU percent plus weighted resident memory in MB.
    pub fn score(&self) -> f64 {
        self.cpu_percent + self.memory_mb * crate::system_sampler::MEMORY_SCORE_WEIGHT
    }
}
