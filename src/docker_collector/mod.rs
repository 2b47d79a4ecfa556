// Docker container stats via bollard

mod stats;

pub use stats::{calculate_cpu_percent, clean_name, extract_ports};

use crate::broadcast::Broadcaster;
use crate::models::{ContainerStats, ContainerStatus};
use bollard::Docker;
use bollard::models::{ContainerStatsResponse, ContainerSummary};
use bollard::query_parameters::{InspectContainerOptions, ListContainersOptions, StatsOptions};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Per-container budget for inspect + stats.
pub const CONTAINER_TIMEOUT: Duration = Duration::from_secs(6);

/// Budget for a whole refresh cycle.
pub const CYCLE_DEADLINE: Duration = Duration::from_secs(15);

const SHORT_ID_LEN: usize = 12;

/// Seconds bollard waits on a single request before failing it.
const CLIENT_TIMEOUT_SECS: u64 = 20;

pub struct DockerCollector {
    docker: Option<Docker>,
    cache: RwLock<Vec<ContainerStats>>,
    reachable: AtomicBool,
    broadcast: Broadcaster<Vec<ContainerStats>>,
}

impl DockerCollector {
    /// Builds a client for the socket. Never fails: an unusable socket path
    /// just means every refresh reports no containers.
    pub fn connect(socket_path: &str) -> Self {
        let docker = match Docker::connect_with_unix(
            socket_path,
            CLIENT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        ) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(error = %e, socket = socket_path, "Docker client unavailable");
                None
            }
        };
        Self {
            docker,
            cache: RwLock::new(Vec::new()),
            reachable: AtomicBool::new(true),
            broadcast: Broadcaster::new(),
        }
    }

    /// Client handle shared with service detection.
    pub fn client(&self) -> Option<Docker> {
        self.docker.clone()
    }

    pub fn broadcaster(&self) -> &Broadcaster<Vec<ContainerStats>> {
        &self.broadcast
    }

    /// Latest container list from the cache.
    pub async fn collect(&self) -> Vec<ContainerStats> {
        self.cache.read().await.clone()
    }

    /// Lists, inspects and samples every container, then swaps the cache and publishes.
    #[instrument(skip(self), fields(component = "docker", operation = "refresh"))]
    pub async fn refresh(&self) {
        let deadline = Instant::now() + CYCLE_DEADLINE;
        let containers = match self.docker.as_ref() {
            Some(docker) => self.fetch(docker, deadline).await,
            None => Vec::new(),
        };

        *self.cache.write().await = containers.clone();
        self.broadcast.send(containers);
    }

    async fn fetch(&self, docker: &Docker, deadline: Instant) -> Vec<ContainerStats> {
        let options = ListContainersOptions {
            all: true,
            ..Default::default()
        };
        let listed = tokio::time::timeout_at(deadline, docker.list_containers(Some(options))).await;
        let summaries = match listed {
            Ok(Ok(list)) => {
                if !self.reachable.swap(true, Ordering::Relaxed) {
                    info!("Docker daemon reachable again");
                }
                list
            }
            Ok(Err(e)) => {
                self.mark_unreachable(&e.to_string());
                return Vec::new();
            }
            Err(_) => {
                self.mark_unreachable("list timed out");
                return Vec::new();
            }
        };

        let tasks = summaries
            .into_iter()
            .map(|summary| container_stats(docker, summary, deadline));
        futures_util::future::join_all(tasks).await
    }

    fn mark_unreachable(&self, reason: &str) {
        // Only the transition is logged; the daemon may stay down for hours.
        if self.reachable.swap(false, Ordering::Relaxed) {
            warn!(error = reason, operation = "list_containers", "Docker daemon unreachable");
        }
    }
}

/// Builds one entry from the list summary, then fills it within the per-container budget.
/// Whatever was filled before a timeout is kept.
async fn container_stats(
    docker: &Docker,
    summary: ContainerSummary,
    deadline: Instant,
) -> ContainerStats {
    let full_id = summary.id.clone().unwrap_or_default();
    let state = summary
        .state
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_default();
    let mut out = ContainerStats {
        id: full_id.chars().take(SHORT_ID_LEN).collect(),
        name: clean_name(summary.names.as_deref()),
        image: summary.image.clone().unwrap_or_default(),
        status: ContainerStatus::from_docker(&state),
        health_status: "none".to_string(),
        ..Default::default()
    };

    let budget = (Instant::now() + CONTAINER_TIMEOUT).min(deadline);
    if tokio::time::timeout_at(budget, fill(docker, &full_id, &mut out))
        .await
        .is_err()
    {
        debug!(container = %out.name, "container inspection timed out");
    }
    out
}

async fn fill(docker: &Docker, id: &str, out: &mut ContainerStats) {
    if out.status == ContainerStatus::Running
        && let Some(s) = one_shot_stats(docker, id).await
    {
        stats::apply_statistics(&s, out);
    }
    match docker
        .inspect_container(id, None::<InspectContainerOptions>)
        .await
    {
        Ok(info) => stats::apply_inspect(&info, out),
        Err(e) => debug!(error = %e, container = %out.name, "inspect failed"),
    }
}

async fn one_shot_stats(docker: &Docker, id: &str) -> Option<ContainerStatsResponse> {
    let options = StatsOptions {
        stream: false,
        ..Default::default()
    };
    match docker.stats(id, Some(options)).next().await {
        Some(Ok(s)) => Some(s),
        Some(Err(e)) => {
            debug!(error = %e, container = id, "stats failed");
            None
        }
        None => None,
    }
}
