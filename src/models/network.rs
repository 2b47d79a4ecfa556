// Network interface aggregates

use serde::{Deserialize, Serialize};

/// Rates and counter deltas summed over a class of interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceStats {
    pub download_bytes_per_sec: f64,
    pub upload_bytes_per_sec: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub rx_errors: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub rx_drops: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub tx_errors: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub tx_drops: u64,
}

impl InterfaceStats {
    pub fn is_idle(&self) -> bool {
        self.download_bytes_per_sec <= 0.0
            && self.upload_bytes_per_sec <= 0.0
            && self.rx_errors == 0
            && self.rx_drops == 0
            && self.tx_errors == 0
            && self.tx_drops == 0
    }
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// Physical and virtual (bridge/veth/CNI) traffic, never summed together
/// since virtual traffic is also seen on the physical side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkReport {
    pub physical: InterfaceStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#virtual: Option<InterfaceStats>,
}

impl NetworkReport {
    /// Builds a report, omitting the virtual side when it saw no activity.
    pub fn new(physical: InterfaceStats, virtual_side: InterfaceStats) -> Self {
        Self {
            physical,
            r#virtual: (!virtual_side.is_idle()).then_some(virtual_side),
        }
    }
}
