// Map raw Docker stats and inspect responses onto ContainerStats.

use crate::models::{ContainerStats, PortMapping, round2};
use bollard::models::{ContainerInspectResponse, ContainerStatsResponse, PortMap};

/// Memory limits at or above this are Docker's "unlimited" sentinel.
const UNLIMITED_MEMORY: u64 = 1 << 62;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// CPU percent across `cores`; 0 when either delta is not positive.
pub fn calculate_cpu_percent(container_delta: i128, system_delta: i128, cores: u64) -> f64 {
    if container_delta <= 0 || system_delta <= 0 {
        return 0.0;
    }
    let percent = container_delta as f64 / system_delta as f64 * cores.max(1) as f64 * 100.0;
    round2(percent)
}

fn cpu_percent(s: &ContainerStatsResponse) -> f64 {
    let (Some(cpu), Some(precpu)) = (s.cpu_stats.as_ref(), s.precpu_stats.as_ref()) else {
        return 0.0;
    };
    let usage = cpu.cpu_usage.as_ref();
    let pre_usage = precpu.cpu_usage.as_ref();

    let container_delta = usage.and_then(|u| u.total_usage).unwrap_or(0) as i128
        - pre_usage.and_then(|u| u.total_usage).unwrap_or(0) as i128;
    let system_delta = cpu.system_cpu_usage.unwrap_or(0) as i128
        - precpu.system_cpu_usage.unwrap_or(0) as i128;

    let percpu = usage
        .and_then(|u| u.percpu_usage.as_ref())
        .map_or(0, |p| p.len() as u64);
    let cores = match (percpu, cpu.online_cpus.unwrap_or(0) as u64) {
        (0, 0) => 1,
        (0, online) => online,
        (n, _) => n,
    };
    calculate_cpu_percent(container_delta, system_delta, cores)
}

/// Fills resource fields of a running container from a one-shot stats response.
pub(crate) fn apply_statistics(s: &ContainerStatsResponse, out: &mut ContainerStats) {
    out.cpu_percent = cpu_percent(s);

    let memory = s.memory_stats.as_ref();
    let usage = memory.and_then(|m| m.usage).unwrap_or(0);
    let limit = memory.and_then(|m| m.limit).unwrap_or(0);
    out.memory_usage_mb = round2(usage as f64 / BYTES_PER_MB);
    out.memory_limit_mb = if limit > 0 && limit < UNLIMITED_MEMORY {
        round2(limit as f64 / BYTES_PER_MB)
    } else {
        0.0
    };

    if let Some(networks) = s.networks.as_ref() {
        for n in networks.values() {
            out.network_rx_bytes += n.rx_bytes.unwrap_or(0);
            out.network_tx_bytes += n.tx_bytes.unwrap_or(0);
        }
    }

    if let Some(entries) = s
        .blkio_stats
        .as_ref()
        .and_then(|b| b.io_service_bytes_recursive.as_ref())
    {
        for e in entries {
            let value = e.value.unwrap_or(0);
            match e.op.as_deref() {
                Some(op) if op.eq_ignore_ascii_case("read") => out.block_read_bytes += value,
                Some(op) if op.eq_ignore_ascii_case("write") => out.block_write_bytes += value,
                _ => {}
            }
        }
    }

    out.pids = s.pids_stats.as_ref().and_then(|p| p.current).unwrap_or(0);
}

/// Fills start time, restart count, health and ports from an inspect response.
pub(crate) fn apply_inspect(info: &ContainerInspectResponse, out: &mut ContainerStats) {
    if let Some(state) = info.state.as_ref() {
        if let Some(started_at) = state.started_at.as_ref() {
            out.started_at = started_at.clone();
        }
        if let Some(status) = state
            .health
            .as_ref()
            .and_then(|h| h.status.as_ref())
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
        {
            out.health_status = status;
        }
    }
    out.restart_count = info.restart_count.unwrap_or(0);
    if let Some(ports) = info.network_settings.as_ref().and_then(|n| n.ports.as_ref()) {
        out.ports = extract_ports(ports);
    }
}

/// Published host bindings, sorted; IPv4/IPv6 duplicates of one binding collapse.
pub fn extract_ports(map: &PortMap) -> Vec<PortMapping> {
    let mut ports: Vec<PortMapping> = map
        .iter()
        .flat_map(|(key, bindings)| {
            let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            let container_port = port.parse::<u16>().ok();
            bindings
                .iter()
                .flatten()
                .filter_map(move |b| {
                    let host_port = b.host_port.as_deref()?.parse::<u16>().ok()?;
                    Some(PortMapping {
                        host_port,
                        container_port: container_port?,
                        protocol: protocol.to_string(),
                    })
                })
        })
        .collect();
    ports.sort();
    ports.dedup();
    ports
}

/// Container name without Docker's leading `/`.
pub fn clean_name(names: Option<&[String]>) -> String {
    names
        .and_then(|n| n.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{
        ContainerBlkioStatEntry, ContainerBlkioStats, ContainerCpuStats, ContainerCpuUsage,
        ContainerMemoryStats, ContainerNetworkStats, ContainerPidsStats, PortBinding,
    };
    use std::collections::HashMap;

    fn cpu_stats(total_usage: u64, system_cpu_usage: u64, online: u32) -> ContainerCpuStats {
        ContainerCpuStats {
            cpu_usage: Some(ContainerCpuUsage {
                total_usage: Some(total_usage),
                ..Default::default()
            }),
            system_cpu_usage: Some(system_cpu_usage),
            online_cpus: Some(online),
            ..Default::default()
        }
    }

    #[test]
    fn cpu_percent_scales_by_cores() {
        assert_eq!(calculate_cpu_percent(200_000_000, 1_000_000_000, 4), 80.0);
    }

    #[test]
    fn cpu_percent_is_zero_for_non_positive_deltas() {
        assert_eq!(calculate_cpu_percent(0, 1_000, 4), 0.0);
        assert_eq!(calculate_cpu_percent(100, 0, 4), 0.0);
        assert_eq!(calculate_cpu_percent(-5, 1_000, 4), 0.0);
        assert_eq!(calculate_cpu_percent(100, -1_000, 4), 0.0);
    }

    #[test]
    fn percpu_list_takes_precedence_over_online_cpus() {
        let mut cpu = cpu_stats(300, 1_000, 8);
        if let Some(u) = cpu.cpu_usage.as_mut() {
            u.percpu_usage = Some(vec![0, 0]);
        }
        let s = ContainerStatsResponse {
            cpu_stats: Some(cpu),
            precpu_stats: Some(cpu_stats(200, 500, 8)),
            ..Default::default()
        };
        // 100 / 500 * 2 cores
        assert_eq!(cpu_percent(&s), 40.0);
    }

    #[test]
    fn missing_core_information_counts_one_core() {
        let s = ContainerStatsResponse {
            cpu_stats: Some(cpu_stats(150, 1_000, 0)),
            precpu_stats: Some(cpu_stats(50, 500, 0)),
            ..Default::default()
        };
        assert_eq!(cpu_percent(&s), 20.0);
    }

    #[test]
    fn statistics_fill_memory_network_block_and_pids() {
        let s = ContainerStatsResponse {
            cpu_stats: Some(cpu_stats(100_000_000, 1_000_000_000, 2)),
            precpu_stats: Some(cpu_stats(50_000_000, 500_000_000, 2)),
            memory_stats: Some(ContainerMemoryStats {
                usage: Some(256 * 1024 * 1024),
                limit: Some(512 * 1024 * 1024),
                ..Default::default()
            }),
            networks: Some(HashMap::from([
                (
                    "eth0".to_string(),
                    ContainerNetworkStats {
                        rx_bytes: Some(1000),
                        tx_bytes: Some(2000),
                        ..Default::default()
                    },
                ),
                (
                    "eth1".to_string(),
                    ContainerNetworkStats {
                        rx_bytes: Some(1),
                        tx_bytes: Some(2),
                        ..Default::default()
                    },
                ),
            ])),
            pids_stats: Some(ContainerPidsStats {
                current: Some(5),
                ..Default::default()
            }),
            blkio_stats: Some(ContainerBlkioStats {
                io_service_bytes_recursive: Some(vec![
                    ContainerBlkioStatEntry {
                        op: Some("Read".to_string()),
                        value: Some(100),
                        ..Default::default()
                    },
                    ContainerBlkioStatEntry {
                        op: Some("write".to_string()),
                        value: Some(200),
                        ..Default::default()
                    },
                    ContainerBlkioStatEntry {
                        op: Some("sync".to_string()),
                        value: Some(999),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut out = ContainerStats::default();
        apply_statistics(&s, &mut out);
        assert_eq!(out.cpu_percent, 20.0);
        assert_eq!(out.memory_usage_mb, 256.0);
        assert_eq!(out.memory_limit_mb, 512.0);
        assert_eq!(out.network_rx_bytes, 1001);
        assert_eq!(out.network_tx_bytes, 2002);
        assert_eq!(out.block_read_bytes, 100);
        assert_eq!(out.block_write_bytes, 200);
        assert_eq!(out.pids, 5);
    }

    #[test]
    fn unlimited_memory_reports_zero_limit() {
        let s = ContainerStatsResponse {
            memory_stats: Some(ContainerMemoryStats {
                usage: Some(1024 * 1024),
                limit: Some(u64::MAX),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut out = ContainerStats::default();
        apply_statistics(&s, &mut out);
        assert_eq!(out.memory_usage_mb, 1.0);
        assert_eq!(out.memory_limit_mb, 0.0);
    }

    #[test]
    fn ports_parse_bindings_and_skip_unpublished() {
        let binding = |port: &str| PortBinding {
            host_ip: Some("0.0.0.0".to_string()),
            host_port: Some(port.to_string()),
        };
        let map: PortMap = HashMap::from([
            ("80/tcp".to_string(), Some(vec![binding("8080"), binding("8080")])),
            ("53/udp".to_string(), Some(vec![binding("5353")])),
            ("9000/tcp".to_string(), None),
        ]);
        let ports = extract_ports(&map);
        assert_eq!(
            ports,
            vec![
                PortMapping {
                    host_port: 5353,
                    container_port: 53,
                    protocol: "udp".to_string()
                },
                PortMapping {
                    host_port: 8080,
                    container_port: 80,
                    protocol: "tcp".to_string()
                },
            ]
        );
    }

    #[test]
    fn names_lose_leading_slash() {
        let names = vec!["/pihole".to_string()];
        assert_eq!(clean_name(Some(&names)), "pihole");
        assert_eq!(clean_name(None), "");
    }
}
