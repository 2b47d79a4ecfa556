// Domain models shared by collectors, detector and subscribers

mod container;
mod network;
mod process;
mod service;
mod storage;
mod system;

pub use container::{ContainerStats, ContainerStatus, PortMapping};
pub use network::{InterfaceStats, NetworkReport};
pub use process::ProcessInfo;
pub use service::{DetectedService, ServiceStats, ServiceStatus, StatItem, StatKind};
pub use storage::DiskInfo;
pub use system::{CpuStats, MemoryStats, SystemEvent, SystemStats};

/// Rounds to two decimals, the precision every published percentage and rate uses.
pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
