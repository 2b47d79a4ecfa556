// Self-hosted service detection and stats collection

mod detector;
mod env;
mod error;
pub mod http;
pub mod nginx;
pub mod pihole;
mod plugin;
pub mod traefik;

pub use detector::{
    DEFAULT_COLLECT_TIMEOUT, DEFAULT_DETECT_DEADLINE, DebugSnapshot, DetectorConfig,
    ServiceDetector,
};
pub use env::{
    ContainerInfo, DetectionEnv, EnvironmentSource, HostEnvironment, ProbeResponse, Prober,
    discover_process_ports, parse_listen_sockets, scan_processes,
};
pub use error::{Result, ServiceError};
pub use nginx::NginxPlugin;
pub use pihole::PiHolePlugin;
pub use plugin::{ServicePlugin, ServiceReport};
pub use traefik::TraefikPlugin;

use std::sync::Arc;

/// The standard plugin set, in detection order.
pub fn default_plugins() -> Vec<Arc<dyn ServicePlugin>> {
    vec![
        Arc::new(PiHolePlugin::new()),
        Arc::new(TraefikPlugin::new()),
        Arc::new(NginxPlugin::new()),
    ]
}

/// Integer with comma thousands separators, e.g. 12345 -> "12,345".
pub fn format_number(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
