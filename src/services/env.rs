// Detection environment: a frozen snapshot of containers, processes and
// listening ports that plugins query, plus the loopback HTTP prober.

use super::http::{probe_client, read_limited};
use async_trait::async_trait;
use bollard::Docker;
use bollard::query_parameters::ListContainersOptions;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Hosts tried for every probed port, in order.
const PROBE_HOSTS: &[&str] = &["127.0.0.1", "localhost"];

/// Bytes of a probe response kept for body checks.
const PROBE_BODY_BYTES: usize = 64 * 1024;

const CONTAINER_LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP state code for LISTEN in /proc/net/tcp.
const TCP_LISTEN: &str = "0A";

/// Lightweight container record used during detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub state: String,
    pub host_ports: Vec<u16>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// What a probe saw, handed to plugin-specific acceptance checks.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: String,
}

impl ProbeResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetectionEnv {
    pub containers: Vec<ContainerInfo>,
    pub processes: BTreeSet<String>,
    pub process_ports: BTreeMap<String, Vec<u16>>,
    prober: Prober,
}

impl DetectionEnv {
    pub fn new(
        containers: Vec<ContainerInfo>,
        processes: BTreeSet<String>,
        process_ports: BTreeMap<String, Vec<u16>>,
    ) -> Self {
        Self {
            containers,
            processes,
            process_ports,
            prober: Prober::default(),
        }
    }

    /// First container whose image contains `needle` (case-insensitive).
    pub fn find_docker_image(&self, needle: &str) -> Option<&ContainerInfo> {
        let needle = needle.to_lowercase();
        self.containers
            .iter()
            .find(|c| c.image.to_lowercase().contains(&needle))
    }

    pub fn has_process(&self, name: &str) -> bool {
        self.processes.contains(name)
    }

    pub fn has_process_substring(&self, needle: &str) -> bool {
        self.processes.iter().any(|p| p.contains(needle))
    }

    pub fn find_process_ports(&self, name: &str) -> Vec<u16> {
        self.process_ports.get(name).cloned().unwrap_or_default()
    }

    /// Listening ports of every process whose name contains `needle`, deduplicated.
    pub fn find_process_ports_by_substring(&self, needle: &str) -> Vec<u16> {
        let mut ports = Vec::new();
        for (_, p) in self.process_ports.iter().filter(|(n, _)| n.contains(needle)) {
            for port in p {
                if !ports.contains(port) {
                    ports.push(*port);
                }
            }
        }
        ports
    }

    /// Base URL (`http://host:port`) of the first port answering `path` with 2xx/3xx.
    pub async fn probe_http(&self, ports: &[u16], path: &str) -> Option<String> {
        self.prober.probe(ports, path, |_| true).await
    }

    /// Like [`probe_http`](Self::probe_http), with an extra check on the response.
    pub async fn probe_http_with(
        &self,
        ports: &[u16],
        path: &str,
        accept: impl Fn(&ProbeResponse) -> bool + Send + Sync,
    ) -> Option<String> {
        self.prober.probe(ports, path, accept).await
    }
}

/// Loopback HTTP prober.
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
}

impl Default for Prober {
    fn default() -> Self {
        Self {
            client: probe_client(),
        }
    }
}

impl Prober {
    async fn probe(
        &self,
        ports: &[u16],
        path: &str,
        accept: impl Fn(&ProbeResponse) -> bool + Send + Sync,
    ) -> Option<String> {
        let mut tried = Vec::with_capacity(ports.len());
        for &port in ports {
            if tried.contains(&port) {
                continue;
            }
            tried.push(port);
            for host in PROBE_HOSTS {
                let base = format!("http://{host}:{port}");
                let url = format!("{base}{path}");
                let Ok(resp) = self.client.get(&url).send().await else {
                    continue;
                };
                let status = resp.status().as_u16();
                if !(200..400).contains(&status) {
                    continue;
                }
                let location = resp
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let body = read_limited(resp, PROBE_BODY_BYTES)
                    .await
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
                    .unwrap_or_default();
                let seen = ProbeResponse {
                    status,
                    location,
                    body,
                };
                if accept(&seen) {
                    debug!(url = %url, status, "probe hit");
                    return Some(base);
                }
            }
        }
        None
    }
}

/// Produces a fresh [`DetectionEnv`] for each detection cycle.
#[async_trait]
pub trait EnvironmentSource: Send + Sync {
    async fn snapshot(&self) -> DetectionEnv;
}

/// A fixed snapshot is its own source.
#[async_trait]
impl EnvironmentSource for DetectionEnv {
    async fn snapshot(&self) -> DetectionEnv {
        self.clone()
    }
}

/// Environment read from the local Docker daemon and /proc.
pub struct HostEnvironment {
    docker: Option<Docker>,
    proc_root: PathBuf,
}

impl HostEnvironment {
    pub fn new(docker: Option<Docker>, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            docker,
            proc_root: proc_root.into(),
        }
    }

    async fn list_containers(&self) -> Vec<ContainerInfo> {
        let Some(docker) = self.docker.as_ref() else {
            return Vec::new();
        };
        let options = ListContainersOptions {
            all: true,
            ..Default::default()
        };
        let listed =
            tokio::time::timeout(CONTAINER_LIST_TIMEOUT, docker.list_containers(Some(options)))
                .await;
        let summaries = match listed {
            Ok(Ok(list)) => list,
            Ok(Err(e)) => {
                debug!(error = %e, "container list for detection failed");
                return Vec::new();
            }
            Err(_) => {
                debug!("container list for detection timed out");
                return Vec::new();
            }
        };
        summaries
            .into_iter()
            .map(|c| ContainerInfo {
                name: crate::docker_collector::clean_name(c.names.as_deref()),
                image: c.image.unwrap_or_default(),
                state: c.state.map(|s| s.to_string()).unwrap_or_default(),
                host_ports: c
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|p| p.public_port.filter(|&port| port > 0))
                    .collect(),
            })
            .collect()
    }
}

#[async_trait]
impl EnvironmentSource for HostEnvironment {
    async fn snapshot(&self) -> DetectionEnv {
        let containers = self.list_containers().await;
        let proc_root = self.proc_root.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            let names = scan_processes(&proc_root);
            let ports = discover_process_ports(&proc_root, &names);
            (names, ports)
        })
        .await;
        let (names, process_ports) = match scanned {
            Ok(scanned) => scanned,
            Err(e) => {
                tracing::warn!(error = %e, operation = "scan_processes", "process scan failed");
                Default::default()
            }
        };
        let processes: BTreeSet<String> = names.into_values().collect();
        info!(
            containers = containers.len(),
            processes = processes.len(),
            listening = process_ports.len(),
            "detection environment built"
        );
        DetectionEnv::new(containers, processes, process_ports)
    }
}

/// PID to process name from `<proc>/<pid>/comm`.
pub fn scan_processes(proc_root: &Path) -> HashMap<i32, String> {
    let Ok(entries) = std::fs::read_dir(proc_root) else {
        return HashMap::new();
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let pid: i32 = entry.file_name().to_str()?.parse().ok()?;
            let comm = std::fs::read_to_string(entry.path().join("comm")).ok()?;
            Some((pid, comm.trim().to_string()))
        })
        .collect()
}

/// Socket inode to port for LISTEN rows of /proc/net/tcp or tcp6.
pub fn parse_listen_sockets(content: &str) -> HashMap<u64, u16> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                return None;
            }
            let (_, port_hex) = fields[1].rsplit_once(':')?;
            let port = u16::from_str_radix(port_hex, 16).ok()?;
            let inode = fields[9].parse().ok()?;
            Some((inode, port))
        })
        .collect()
}

/// Inode number of a `socket:[12345]` fd link target.
fn socket_inode(link: &Path) -> Option<u64> {
    link.to_str()?
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Process name to listening TCP ports, by matching each process's socket fds
/// against the listening sockets of the kernel tables.
pub fn discover_process_ports(
    proc_root: &Path,
    pid_names: &HashMap<i32, String>,
) -> BTreeMap<String, Vec<u16>> {
    let mut inode_ports = HashMap::new();
    for table in ["net/tcp", "net/tcp6"] {
        if let Ok(content) = std::fs::read_to_string(proc_root.join(table)) {
            inode_ports.extend(parse_listen_sockets(&content));
        }
    }
    let mut result: BTreeMap<String, Vec<u16>> = BTreeMap::new();
    if inode_ports.is_empty() {
        return result;
    }

    for (pid, name) in pid_names {
        let Ok(fds) = std::fs::read_dir(proc_root.join(pid.to_string()).join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            let Some(port) = std::fs::read_link(fd.path())
                .ok()
                .and_then(|link| socket_inode(&link))
                .and_then(|inode| inode_ports.get(&inode))
            else {
                continue;
            };
            let ports = result.entry(name.clone()).or_default();
            if !ports.contains(port) {
                ports.push(*port);
            }
        }
    }
    for ports in result.values_mut() {
        ports.sort_unstable();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n\
   0: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 1111 1 0000000000000000 100 0 0 10 0\n\
   1: 0100007F:0035 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 2222 1 0000000000000000 100 0 0 10 0\n\
   2: 0100007F:9C40 0100007F:1F90 01 00000000:00000000 00:00000000 00000000  1000        0 3333 1 0000000000000000 20 4 30 10 -1\n";

    #[test]
    fn listen_sockets_map_inode_to_port() {
        let sockets = parse_listen_sockets(TCP);
        assert_eq!(sockets.len(), 2);
        assert_eq!(sockets.get(&1111), Some(&8080));
        assert_eq!(sockets.get(&2222), Some(&53));
        assert!(!sockets.contains_key(&3333));
    }

    #[test]
    fn tcp6_addresses_parse() {
        let tcp6 = "  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n\
   0: 00000000000000000000000000000000:0050 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 4444 1 0000000000000000 100 0 0 10 0\n";
        assert_eq!(parse_listen_sockets(tcp6).get(&4444), Some(&80));
    }

    #[test]
    fn process_ports_correlate_fd_links() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("net")).unwrap();
        std::fs::write(root.join("net/tcp"), TCP).unwrap();

        for (pid, comm, links) in [
            (100, "nginx", vec!["socket:[1111]", "/dev/null", "socket:[9999]"]),
            (101, "nginx", vec!["socket:[1111]"]),
            (200, "pihole-FTL", vec!["socket:[2222]", "pipe:[5]"]),
        ] {
            let fd_dir = root.join(pid.to_string()).join("fd");
            std::fs::create_dir_all(&fd_dir).unwrap();
            std::fs::write(root.join(pid.to_string()).join("comm"), format!("{comm}\n")).unwrap();
            for (i, link) in links.iter().enumerate() {
                std::os::unix::fs::symlink(link, fd_dir.join(i.to_string())).unwrap();
            }
        }

        let names = scan_processes(root);
        assert_eq!(names.len(), 3);
        let ports = discover_process_ports(root, &names);
        assert_eq!(ports.get("nginx"), Some(&vec![8080]));
        assert_eq!(ports.get("pihole-FTL"), Some(&vec![53]));
    }

    #[test]
    fn env_queries() {
        let env = DetectionEnv::new(
            vec![ContainerInfo {
                name: "dns".into(),
                image: "PiHole/PiHole:latest".into(),
                state: "running".into(),
                host_ports: vec![8053],
            }],
            ["pihole-FTL".to_string(), "sshd".to_string()].into(),
            BTreeMap::from([
                ("pihole-FTL".to_string(), vec![53, 80]),
                ("pihole-helper".to_string(), vec![80, 4711]),
            ]),
        );
        assert!(env.find_docker_image("pihole").is_some_and(|c| c.is_running()));
        assert!(env.find_docker_image("traefik").is_none());
        assert!(env.has_process("sshd"));
        assert!(!env.has_process("pihole"));
        assert!(env.has_process_substring("pihole"));
        assert_eq!(env.find_process_ports("pihole-FTL"), vec![53, 80]);
        assert_eq!(env.find_process_ports_by_substring("pihole"), vec![53, 80, 4711]);
        assert!(env.find_process_ports("nginx").is_empty());
    }
}
