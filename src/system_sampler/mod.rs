// Host sampler: CPU, memory, disks, network rates and top processes

pub mod host;
pub mod procfs;
pub mod process;

use crate::broadcast::Broadcaster;
use crate::models::*;
use host::HostInfo;
use procfs::{CpuTimes, NetSample, ProcFs};
use process::ProcessTracker;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use sysinfo::System;
use tokio::sync::RwLock;
use tracing::instrument;

/// MB of resident memory counted as one CPU percent when ranking processes.
pub const MEMORY_SCORE_WEIGHT: f64 = 0.1;

/// Processes kept per tick unless configured otherwise.
pub const DEFAULT_PROCESS_KEEP: usize = 15;

/// Processes returned by [`SystemSampler::collect_top_processes`] for a non-positive limit.
pub const DEFAULT_PROCESS_LIMIT: usize = 10;

/// Counters carried from one tick to the next.
struct SamplerState {
    prev_cpu: Option<CpuTimes>,
    prev_net: Option<(NetSample, Instant)>,
    tracker: ProcessTracker,
}

/// Values that only change on a tick; point reads merge them with fresh disk/memory data.
#[derive(Debug, Clone, Default)]
struct TickCache {
    cpu_usage: f64,
    physical: InterfaceStats,
    virtual_side: InterfaceStats,
    processes: Vec<ProcessInfo>,
}

/// Output of one tick, computed off the async runtime.
struct TickResult {
    cpu_usage: Option<f64>,
    net: Option<(InterfaceStats, InterfaceStats)>,
    processes: Vec<ProcessInfo>,
}

impl SamplerState {
    fn advance(&mut self, fs: &ProcFs, host: &mut HostInfo, cores: usize) -> TickResult {
        let now = Instant::now();

        let cur_cpu = fs.read_cpu_times();
        let cpu_usage = match (self.prev_cpu, cur_cpu) {
            (Some(prev), Some(cur)) => procfs::cpu_usage_percent(prev, cur),
            _ => None,
        };
        if cur_cpu.is_some() {
            self.prev_cpu = cur_cpu;
        }

        let cur_net = fs.read_net_sample();
        let net = self.prev_net.and_then(|(prev, at)| {
            let elapsed = now.saturating_duration_since(at).as_secs_f64();
            (elapsed > 0.0).then(|| {
                (
                    procfs::interface_rates(&prev.physical, &cur_net.physical, elapsed),
                    procfs::interface_rates(&prev.virtual_side, &cur_net.virtual_side, elapsed),
                )
            })
        });
        self.prev_net = Some((cur_net, now));

        let total_memory_bytes = host.memory().total_bytes;
        let mut processes = self
            .tracker
            .update(host.processes(), now, cores, total_memory_bytes);
        // Only the survivors of the cut are enriched.
        for p in &mut processes {
            (p.command, p.user) = host.describe(p.pid);
        }

        TickResult {
            cpu_usage,
            net,
            processes,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SystemSampler {
    fs: Arc<ProcFs>,
    core_count: usize,
    state: Arc<Mutex<SamplerState>>,
    host: Arc<Mutex<HostInfo>>,
    cache: RwLock<TickCache>,
    broadcast: Broadcaster<SystemEvent>,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new(ProcFs::default(), DEFAULT_PROCESS_KEEP)
    }
}

impl SystemSampler {
    /// Takes the baseline CPU and network readings so the first tick already has deltas.
    pub fn new(fs: ProcFs, process_keep: usize) -> Self {
        let core_count = fs.core_count();
        let state = SamplerState {
            prev_cpu: fs.read_cpu_times(),
            prev_net: Some((fs.read_net_sample(), Instant::now())),
            tracker: ProcessTracker::new(process_keep.max(1)),
        };
        Self {
            fs: Arc::new(fs),
            core_count,
            state: Arc::new(Mutex::new(state)),
            host: Arc::new(Mutex::new(HostInfo::new())),
            cache: RwLock::new(TickCache::default()),
            broadcast: Broadcaster::new(),
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster<SystemEvent> {
        &self.broadcast
    }

    pub fn core_count(&self) -> usize {
        self.core_count
    }

    /// One sampling tick: advance counters, refresh the cache, publish a [`SystemEvent`].
    #[instrument(skip(self), fields(component = "system_sampler", operation = "sample"))]
    pub async fn sample(&self) {
        let fs = self.fs.clone();
        let state = self.state.clone();
        let host = self.host.clone();
        let cores = self.core_count;
        let tick = tokio::task::spawn_blocking(move || {
            lock(&state).advance(&fs, &mut lock(&host), cores)
        })
        .await;

        let tick = match tick {
            Ok(tick) => tick,
            Err(e) => {
                tracing::warn!(error = %e, operation = "sample", "sampler task failed");
                return;
            }
        };

        let snapshot = {
            let mut cache = self.cache.write().await;
            if let Some(usage) = tick.cpu_usage {
                cache.cpu_usage = usage;
            }
            if let Some((physical, virtual_side)) = tick.net {
                cache.physical = physical;
                cache.virtual_side = virtual_side;
            }
            cache.processes = tick.processes.clone();
            cache.clone()
        };

        let system = self.assemble(&snapshot).await;
        self.broadcast.send(SystemEvent {
            system,
            processes: tick.processes,
        });
    }

    /// Latest system snapshot; memory, disks, temperature and uptime are read fresh.
    #[instrument(skip(self), fields(component = "system_sampler", operation = "collect"))]
    pub async fn collect(&self) -> SystemStats {
        let snapshot = self.cache.read().await.clone();
        self.assemble(&snapshot).await
    }

    /// Copy of the top `limit` processes from the last tick.
    pub async fn collect_top_processes(&self, limit: usize) -> Vec<ProcessInfo> {
        let limit = if limit == 0 {
            DEFAULT_PROCESS_LIMIT
        } else {
            limit
        };
        let cache = self.cache.read().await;
        cache.processes.iter().take(limit).cloned().collect()
    }

    async fn assemble(&self, cache: &TickCache) -> SystemStats {
        let host = self.host.clone();
        let point = tokio::task::spawn_blocking(move || {
            let mut host = lock(&host);
            (host.memory(), host.disks(), host.temperature(), System::uptime())
        })
        .await;

        let (memory, disks, (temperature, temperature_available), uptime_secs) = match point {
            Ok(point) => point,
            Err(e) => {
                tracing::warn!(error = %e, operation = "collect", "point read task failed");
                (MemoryStats::default(), Vec::new(), (0.0, false), 0)
            }
        };

        SystemStats {
            cpu: CpuStats {
                usage_percent: cache.cpu_usage,
                core_count: self.core_count,
                temperature,
                temperature_available,
            },
            memory,
            disks,
            network: NetworkReport::new(cache.physical, cache.virtual_side),
            uptime_secs,
        }
    }
}
