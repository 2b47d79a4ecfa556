// Nginx plugin (stub_status module)

use super::env::{DetectionEnv, ProbeResponse};
use super::error::{Result, ServiceError};
use super::format_number;
use super::http;
use super::plugin::{ServicePlugin, ServiceReport};
use crate::models::{DetectedService, ServiceStatus, StatItem, StatKind};
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Paths commonly mapped to stub_status, tried in order.
pub const STATUS_PATHS: &[&str] = &["/nginx_status", "/stub_status", "/status", "/basic_status"];

const CONTAINER_FALLBACK_PORTS: &[u16] = &[80, 8080];
const COMMON_PORTS: &[u16] = &[80, 8080, 443, 8443];

/// Metadata key holding the stub_status path that answered during detection.
pub const STATUS_PATH_KEY: &str = "statusPath";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StubStatus {
    pub active_connections: i64,
    pub accepts: i64,
    pub handled: i64,
    pub requests: i64,
    pub reading: i64,
    pub writing: i64,
    pub waiting: i64,
}

/// Parses stub_status output:
///
/// ```text
/// Active connections: 291
/// server accepts handled requests
///  16630948 16630946 31070465
/// Reading: 6 Writing: 179 Waiting: 106
/// ```
pub fn parse_stub_status(body: &str) -> Option<StubStatus> {
    let mut s = StubStatus::default();
    let mut active = None;
    for line in body.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Active connections:") {
            active = rest.trim().parse().ok();
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            ["Reading:", r, "Writing:", w, "Waiting:", wt] => {
                s.reading = r.parse().unwrap_or(0);
                s.writing = w.parse().unwrap_or(0);
                s.waiting = wt.parse().unwrap_or(0);
            }
            [a, h, r] => {
                if let (Ok(a), Ok(h), Ok(r)) = (a.parse::<i64>(), h.parse(), r.parse()) {
                    if a > 0 {
                        s.accepts = a;
                        s.handled = h;
                        s.requests = r;
                    }
                }
            }
            _ => {}
        }
    }
    s.active_connections = active?;
    Some(s)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Details {
    #[serde(flatten)]
    status: StubStatus,
    dropped: i64,
}

pub fn stub_status_report(s: StubStatus) -> ServiceReport {
    let summary = vec![
        StatItem::new("Active Connections", format_number(s.active_connections), StatKind::Number),
        StatItem::new("Total Requests", format_number(s.requests), StatKind::Number),
        StatItem::new("Reading", format_number(s.reading), StatKind::Number),
        StatItem::new("Writing", format_number(s.writing), StatKind::Number),
    ];
    let details = Details {
        status: s,
        dropped: s.accepts - s.handled,
    };
    ServiceReport::new(ServiceStatus::Running, summary, &details)
}

fn looks_like_stub_status(r: &ProbeResponse) -> bool {
    r.body.contains("Active connections")
}

pub struct NginxPlugin {
    client: reqwest::Client,
}

impl Default for NginxPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl NginxPlugin {
    pub fn new() -> Self {
        Self {
            client: http::api_client(false),
        }
    }

    async fn probe_status(
        &self,
        env: &DetectionEnv,
        ports: &[u16],
    ) -> Option<(String, &'static str)> {
        for &path in STATUS_PATHS {
            if let Some(url) = env.probe_http_with(ports, path, looks_like_stub_status).await {
                return Some((url, path));
            }
        }
        None
    }

    fn detected_at(&self, url: String, path: &str) -> DetectedService {
        let mut svc = self.service_at(url);
        svc.meta.insert(STATUS_PATH_KEY.to_string(), path.to_string());
        svc
    }
}

#[async_trait]
impl ServicePlugin for NginxPlugin {
    fn id(&self) -> &'static str {
        "nginx"
    }

    fn name(&self) -> &'static str {
        "Nginx"
    }

    fn icon(&self) -> &'static str {
        "globe"
    }

    async fn detect(&self, env: &DetectionEnv) -> Option<DetectedService> {
        if let Some(c) = env
            .find_docker_image("nginx")
            .filter(|c| c.is_running() && !c.image.to_lowercase().contains("traefik"))
        {
            let mut ports = c.host_ports.clone();
            ports.extend_from_slice(CONTAINER_FALLBACK_PORTS);
            if let Some((url, path)) = self.probe_status(env, &ports).await {
                info!(
                    plugin = self.id(),
                    via = "docker",
                    image = %c.image,
                    url = %url,
                    path,
                    "Nginx found"
                );
                return Some(self.detected_at(url, path));
            }
        }

        if !env.has_process("nginx") {
            return None;
        }
        let mut ports = env.find_process_ports("nginx");
        ports.extend_from_slice(COMMON_PORTS);
        let (url, path) = self.probe_status(env, &ports).await?;
        info!(plugin = self.id(), via = "process", url = %url, path, "Nginx found");
        Some(self.detected_at(url, path))
    }

    async fn collect(&self, svc: &DetectedService) -> Result<ServiceReport> {
        let path = svc.meta(STATUS_PATH_KEY).unwrap_or(STATUS_PATHS[0]);
        let url = format!("{}{path}", svc.base_url);
        let body = http::get_body(&self.client, &url).await?;
        let status = parse_stub_status(&String::from_utf8_lossy(&body))
            .ok_or_else(|| ServiceError::malformed(&url, "missing Active connections line"))?;
        Ok(stub_status_report(status))
    }
}
