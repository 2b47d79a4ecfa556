// Background workers: system tick, docker refresh, service detection/collection, stats logger.
// Every loop observes the shared cancellation token and exits at its next await point.

use crate::config::AppConfig;
use crate::docker_collector::DockerCollector;
use crate::models::{ContainerStats, ContainerStatus, ServiceStats, ServiceStatus, SystemEvent};
use crate::services::ServiceDetector;
use crate::system_sampler::SystemSampler;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;

/// Rate limit for "no subscribers" diagnostics.
const NO_SUBSCRIBERS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Components driven by the workers.
pub struct WorkerDeps {
    pub sampler: Arc<SystemSampler>,
    pub docker: Arc<DockerCollector>,
    pub detector: Arc<ServiceDetector>,
    pub shutdown: CancellationToken,
}

/// Worker timing config.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub sample_interval: Duration,
    pub docker_interval: Duration,
    pub detect_interval: Duration,
    pub collect_interval: Duration,
    pub stats_log_interval: Duration,
    /// Queue length of the stats logger's subscriptions.
    pub subscriber_buffer: usize,
}

impl From<&AppConfig> for WorkerConfig {
    fn from(config: &AppConfig) -> Self {
        let m = &config.monitoring;
        Self {
            sample_interval: Duration::from_millis(m.sample_interval_ms),
            docker_interval: Duration::from_secs(m.docker_interval_secs),
            detect_interval: Duration::from_secs(m.detect_interval_secs),
            collect_interval: Duration::from_secs(m.collect_interval_secs),
            stats_log_interval: Duration::from_secs(m.stats_log_interval_secs),
            subscriber_buffer: config.publishing.subscriber_buffer,
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick
}

/// Spawns all workers. Cancel `deps.shutdown` and await the handles to stop them.
pub fn spawn(deps: WorkerDeps, config: WorkerConfig) -> Vec<JoinHandle<()>> {
    vec![
        spawn_sampler(deps.sampler.clone(), config.sample_interval, deps.shutdown.clone()),
        spawn_docker(deps.docker.clone(), config.docker_interval, deps.shutdown.clone()),
        spawn_services(
            deps.detector.clone(),
            config.detect_interval,
            config.collect_interval,
            deps.shutdown.clone(),
        ),
        spawn_stats_logger(&deps, config.stats_log_interval, config.subscriber_buffer),
    ]
}

pub fn spawn_sampler(
    sampler: Arc<SystemSampler>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = ticker(period);
        let mut last_no_subscribers_log: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    sampler.sample().await;
                    if sampler.broadcaster().subscriber_count() == 0
                        && last_no_subscribers_log
                            .is_none_or(|t| t.elapsed() >= NO_SUBSCRIBERS_LOG_INTERVAL)
                    {
                        tracing::debug!(
                            operation = "broadcast_system",
                            "No subscribers for system events"
                        );
                        last_no_subscribers_log = Some(Instant::now());
                    }
                }
            }
        }
        tracing::debug!("System sampler shutting down");
    })
}

pub fn spawn_docker(
    docker: Arc<DockerCollector>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = ticker(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => docker.refresh().await,
            }
        }
        tracing::debug!("Docker collector shutting down");
    })
}

/// Detects and collects once at startup, then re-detects (followed by a collection) and
/// collects on their own periods.
pub fn spawn_services(
    detector: Arc<ServiceDetector>,
    detect_period: Duration,
    collect_period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut detect_tick = ticker(detect_period);
        let mut collect_tick = interval_at(Instant::now() + collect_period, collect_period);
        collect_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = detect_tick.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = async {
                            detector.run_detection().await;
                            detector.run_collection().await;
                        } => {}
                    }
                }
                _ = collect_tick.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = detector.run_collection() => {}
                    }
                }
            }
        }
        tracing::debug!("Service detector shutting down");
    })
}

#[derive(Debug, Default)]
struct Latest {
    system: Option<SystemEvent>,
    containers: Option<Vec<ContainerStats>>,
    services: Option<Vec<ServiceStats>>,
}

impl Latest {
    fn log(&self) {
        let (cpu_percent, memory_used_mb, top_process) = match &self.system {
            Some(e) => (
                e.system.cpu.usage_percent,
                e.system.memory.used_bytes / (1024 * 1024),
                e.processes.first().map(|p| p.name.clone()).unwrap_or_default(),
            ),
            None => (0.0, 0, String::new()),
        };
        let containers = self.containers.as_deref().unwrap_or_default();
        let running = containers
            .iter()
            .filter(|c| c.status == ContainerStatus::Running)
            .count();
        let services = self.services.as_deref().unwrap_or_default();
        let failing = services
            .iter()
            .filter(|s| s.status != ServiceStatus::Running)
            .count();
        tracing::info!(
            cpu_percent,
            memory_used_mb,
            top_process = %top_process,
            containers_running = running,
            containers_total = containers.len(),
            services = services.len(),
            services_failing = failing,
            "host stats"
        );
    }
}

/// Subscribes to all three broadcasters and logs a summary of the latest values each period.
pub fn spawn_stats_logger(deps: &WorkerDeps, period: Duration, buffer: usize) -> JoinHandle<()> {
    let (mut system_rx, system_sub) = deps.sampler.broadcaster().subscribe(buffer);
    let (mut docker_rx, docker_sub) = deps.docker.broadcaster().subscribe(buffer);
    let (mut services_rx, services_sub) = deps.detector.broadcaster().subscribe(buffer);
    let shutdown = deps.shutdown.clone();

    tokio::spawn(async move {
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut latest = Latest::default();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = system_rx.recv() => latest.system = Some(event),
                Some(containers) = docker_rx.recv() => latest.containers = Some(containers),
                Some(services) = services_rx.recv() => latest.services = Some(services),
                _ = tick.tick() => latest.log(),
            }
        }
        system_sub.cancel();
        docker_sub.cancel();
        services_sub.cancel();
        tracing::debug!("Stats logger shutting down");
    })
}
