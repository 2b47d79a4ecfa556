// Service detector: periodic detection and collection over the registered plugins

use super::env::{ContainerInfo, EnvironmentSource};
use super::error::{Result, ServiceError};
use super::plugin::{ServicePlugin, ServiceReport};
use crate::broadcast::Broadcaster;
use crate::models::{DetectedService, ServiceStats, ServiceStatus};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_DETECT_DEADLINE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Budget for one service's collection (and for actions).
    pub collect_timeout: Duration,
    /// Budget for a whole detection sweep.
    pub detect_deadline: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            collect_timeout: DEFAULT_COLLECT_TIMEOUT,
            detect_deadline: DEFAULT_DETECT_DEADLINE,
        }
    }
}

/// Diagnostics view of the detector and a fresh environment snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSnapshot {
    pub plugins: Vec<String>,
    pub containers: Vec<ContainerInfo>,
    pub processes: Vec<String>,
    pub process_ports: BTreeMap<String, Vec<u16>>,
    /// Plugin id to base URL.
    pub detected: BTreeMap<String, String>,
    pub stats: Vec<ServiceStats>,
}

#[derive(Default)]
struct DetectorState {
    detected: HashMap<String, DetectedService>,
    cached: Vec<ServiceStats>,
    /// Plugin id -> key -> value, injected into every detection of that plugin.
    configs: HashMap<String, HashMap<String, String>>,
}

pub struct ServiceDetector {
    plugins: Vec<Arc<dyn ServicePlugin>>,
    env: Arc<dyn EnvironmentSource>,
    config: DetectorConfig,
    state: RwLock<DetectorState>,
    broadcast: Broadcaster<Vec<ServiceStats>>,
}

impl ServiceDetector {
    pub fn new(
        plugins: Vec<Arc<dyn ServicePlugin>>,
        env: Arc<dyn EnvironmentSource>,
        config: DetectorConfig,
    ) -> Self {
        Self {
            plugins,
            env,
            config,
            state: RwLock::new(DetectorState::default()),
            broadcast: Broadcaster::new(),
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster<Vec<ServiceStats>> {
        &self.broadcast
    }

    /// Stores a per-plugin setting (e.g. a password). It is applied to the live record
    /// right away and to every later detection of that plugin.
    pub async fn set_service_config(&self, plugin_id: &str, key: &str, value: &str) {
        let mut state = self.state.write().await;
        state
            .configs
            .entry(plugin_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        if let Some(svc) = state.detected.get_mut(plugin_id) {
            svc.meta.insert(key.to_string(), value.to_string());
        }
        info!(plugin = plugin_id, key, value = "<redacted>", "service config set");
    }

    /// Runs every plugin's detection against a fresh environment and merges the results.
    /// Probing happens without holding the state lock.
    #[instrument(skip(self), fields(component = "services", operation = "detect"))]
    pub async fn run_detection(&self) {
        if self.plugins.is_empty() {
            debug!("no service plugins registered");
            return;
        }
        let env = self.env.snapshot().await;
        let deadline = tokio::time::Instant::now() + self.config.detect_deadline;

        let sweeps = self.plugins.iter().map(|plugin| {
            let env = &env;
            async move {
                let found = tokio::time::timeout_at(deadline, plugin.detect(env)).await;
                (plugin.id(), found)
            }
        });
        let results = futures_util::future::join_all(sweeps).await;

        let mut state = self.state.write().await;
        let DetectorState {
            detected, configs, ..
        } = &mut *state;

        for (id, found) in results {
            match found {
                Ok(Some(mut svc)) => {
                    let previous = detected.remove(id);
                    match previous.as_ref() {
                        None => info!(plugin = id, url = %svc.base_url, "detected {}", svc.name),
                        Some(prev) if prev.base_url != svc.base_url => {
                            info!(plugin = id, url = %svc.base_url, "{} moved", svc.name)
                        }
                        Some(_) => {}
                    }
                    if let Some(prev) = previous {
                        let mut meta = prev.meta;
                        meta.extend(std::mem::take(&mut svc.meta));
                        svc.meta = meta;
                        if svc.version.is_empty() {
                            svc.version = prev.version;
                        }
                    }
                    if let Some(cfg) = configs.get(id) {
                        svc.meta
                            .extend(cfg.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    detected.insert(id.to_string(), svc);
                }
                Ok(None) => {
                    if let Some(prev) = detected.remove(id) {
                        info!(plugin = id, "{} no longer detected", prev.name);
                    }
                }
                Err(_) => {
                    // Inconclusive: keep whatever was known before.
                    warn!(plugin = id, "detection missed the deadline");
                }
            }
        }
    }

    /// Collects from every detected service concurrently, replaces the cache and publishes.
    #[instrument(skip(self), fields(component = "services", operation = "collect"))]
    pub async fn run_collection(&self) {
        let detected: Vec<(Arc<dyn ServicePlugin>, DetectedService)> = {
            let state = self.state.read().await;
            self.plugins
                .iter()
                .filter_map(|p| state.detected.get(p.id()).map(|s| (p.clone(), s.clone())))
                .collect()
        };

        let timeout = self.config.collect_timeout;
        let tasks = detected.iter().map(|(plugin, svc)| async move {
            let result = match tokio::time::timeout(timeout, plugin.collect(svc)).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout(timeout)),
            };
            if let Err(e) = &result {
                debug!(plugin = plugin.id(), error = %e, "collection failed");
            }
            (plugin.id(), to_stats(plugin.as_ref(), svc, result))
        });
        let results = futures_util::future::join_all(tasks).await;

        let stats: Vec<ServiceStats> = {
            let mut state = self.state.write().await;
            let mut stats = Vec::with_capacity(results.len());
            for (id, (entry, version)) in results {
                if let (Some(version), Some(svc)) = (version, state.detected.get_mut(id)) {
                    if svc.version.is_empty() {
                        svc.version = version;
                    }
                }
                stats.push(entry);
            }
            state.cached = stats.clone();
            stats
        };
        self.broadcast.send(stats);
    }

    /// Latest collected stats.
    pub async fn collect(&self) -> Vec<ServiceStats> {
        self.state.read().await.cached.clone()
    }

    /// Currently detected services.
    pub async fn detected(&self) -> Vec<DetectedService> {
        let state = self.state.read().await;
        self.plugins
            .iter()
            .filter_map(|p| state.detected.get(p.id()).cloned())
            .collect()
    }

    pub async fn debug_info(&self) -> DebugSnapshot {
        let env = self.env.snapshot().await;
        let state = self.state.read().await;
        DebugSnapshot {
            plugins: self.plugins.iter().map(|p| p.id().to_string()).collect(),
            containers: env.containers,
            processes: env.processes.into_iter().collect(),
            process_ports: env.process_ports,
            detected: state
                .detected
                .iter()
                .map(|(id, svc)| (id.clone(), svc.base_url.clone()))
                .collect(),
            stats: state.cached.clone(),
        }
    }

    /// Runs a plugin action against its detected service.
    pub async fn perform_action(
        &self,
        plugin_id: &str,
        action: &str,
        params: &Map<String, Value>,
    ) -> Result<String> {
        let plugin = self
            .plugins
            .iter()
            .find(|p| p.id() == plugin_id)
            .ok_or_else(|| ServiceError::NotDetected(plugin_id.to_string()))?;
        let svc = self
            .state
            .read()
            .await
            .detected
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotDetected(plugin_id.to_string()))?;

        let timeout = self.config.collect_timeout;
        let result = tokio::time::timeout(timeout, plugin.perform_action(&svc, action, params))
            .await
            .unwrap_or(Err(ServiceError::Timeout(timeout)));
        match &result {
            Ok(message) => info!(plugin = plugin_id, action, result = %message, "service action"),
            Err(e) => warn!(plugin = plugin_id, action, error = %e, "service action failed"),
        }
        result
    }
}

/// Builds the published entry, plus any version learned during collection.
fn to_stats(
    plugin: &dyn ServicePlugin,
    svc: &DetectedService,
    result: Result<ServiceReport>,
) -> (ServiceStats, Option<String>) {
    let mut stats = ServiceStats {
        plugin_id: plugin.id().to_string(),
        name: plugin.name().to_string(),
        icon: plugin.icon().to_string(),
        url: svc.base_url.clone(),
        ..Default::default()
    };
    match result {
        Ok(report) => {
            stats.status = report.status;
            stats.summary = report.summary;
            stats.stats = report.stats;
            (stats, report.version)
        }
        Err(e) => {
            stats.status = ServiceStatus::Error;
            stats.error = Some(e.to_string());
            if let ServiceError::AuthFailed(_) = e {
                stats.stats.insert("authFailed".into(), Value::Bool(true));
            }
            (stats, None)
        }
    }
}
