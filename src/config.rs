use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitoring: MonitoringConfig,
    pub docker: DockerConfig,
    pub publishing: PublishingConfig,
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub sample_interval_ms: u64,
    pub docker_interval_secs: u64,
    pub detect_interval_secs: u64,
    pub collect_interval_secs: u64,
    /// Budget for one service's collection.
    pub collect_timeout_secs: u64,
    /// How often to log a one-line summary of the latest published values at INFO level.
    pub stats_log_interval_secs: u64,
    /// Processes kept per sampler tick.
    pub process_keep: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1000,
            docker_interval_secs: 5,
            detect_interval_secs: 30,
            collect_interval_secs: 10,
            collect_timeout_secs: 8,
            stats_log_interval_secs: 60,
            process_keep: crate::system_sampler::DEFAULT_PROCESS_KEEP,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub socket: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: "/var/run/docker.sock".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    /// Queue length of each internal subscriber; a full queue drops new values.
    pub subscriber_buffer: usize,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub pihole: PiHoleConfig,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct PiHoleConfig {
    /// Web password for Pi-hole v6; empty means none configured.
    pub password: String,
}

impl std::fmt::Debug for PiHoleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let password = if self.password.is_empty() {
            ""
        } else {
            "<redacted>"
        };
        f.debug_struct("PiHoleConfig")
            .field("password", &password)
            .finish()
    }
}

impl AppConfig {
    /// Loads from `CONFIG_FILE` (default `config.toml`). A missing file means defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        Self::load_from_path(Path::new(&path))
    }

    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(s) => Self::load_from_str(&s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            Err(e) => Err(anyhow::anyhow!("reading {}: {}", path.display(), e)),
        }
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let m = &self.monitoring;
        for (name, value) in [
            ("monitoring.sample_interval_ms", m.sample_interval_ms),
            ("monitoring.docker_interval_secs", m.docker_interval_secs),
            ("monitoring.detect_interval_secs", m.detect_interval_secs),
            ("monitoring.collect_interval_secs", m.collect_interval_secs),
            ("monitoring.collect_timeout_secs", m.collect_timeout_secs),
            ("monitoring.stats_log_interval_secs", m.stats_log_interval_secs),
        ] {
            anyhow::ensure!(value > 0, "{} must be > 0, got {}", name, value);
        }
        anyhow::ensure!(
            m.process_keep > 0,
            "monitoring.process_keep must be > 0, got {}",
            m.process_keep
        );
        anyhow::ensure!(
            !self.docker.socket.is_empty(),
            "docker.socket must be non-empty"
        );
        anyhow::ensure!(
            self.publishing.subscriber_buffer > 0,
            "publishing.subscriber_buffer must be > 0, got {}",
            self.publishing.subscriber_buffer
        );
        Ok(())
    }
}
