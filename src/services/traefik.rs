// Traefik plugin (dashboard API)

use super::env::{DetectionEnv, ProbeResponse};
use super::error::Result;
use super::format_number;
use super::http;
use super::plugin::{ServicePlugin, ServiceReport};
use crate::models::{DetectedService, ServiceStatus, StatItem, StatKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

const CONTAINER_FALLBACK_PORTS: &[u16] = &[8080, 8443];
const PROCESS_PORTS: &[u16] = &[8080, 8443, 9090];
const BLIND_PORTS: &[u16] = &[8080, 8443];

const OVERVIEW_PATH: &str = "/api/overview";

#[derive(Debug, Default, Deserialize)]
pub struct Overview {
    #[serde(default)]
    pub http: ProtocolOverview,
    #[serde(default)]
    pub tcp: ProtocolOverview,
    #[serde(default)]
    pub udp: ProtocolOverview,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProtocolOverview {
    #[serde(default)]
    pub routers: Count,
    #[serde(default)]
    pub services: Count,
    #[serde(default)]
    pub middlewares: Count,
}

#[derive(Debug, Default, Deserialize)]
pub struct Count {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub warnings: i64,
    #[serde(default)]
    pub errors: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Details {
    http_routers: i64,
    http_services: i64,
    http_middlewares: i64,
    tcp_routers: i64,
    tcp_services: i64,
    udp_routers: i64,
    udp_services: i64,
    entrypoints: i64,
    total_routers: i64,
    total_services: i64,
    warnings: i64,
}

/// Builds the report; HTTP router/service errors make it degraded.
pub fn overview_report(overview: &Overview, entrypoints: i64) -> ServiceReport {
    let total_routers =
        overview.http.routers.total + overview.tcp.routers.total + overview.udp.routers.total;
    let total_services =
        overview.http.services.total + overview.tcp.services.total + overview.udp.services.total;
    let warnings = overview.http.routers.errors + overview.http.services.errors;

    let summary = vec![
        StatItem::new("Routers", format_number(total_routers), StatKind::Number),
        StatItem::new("Services", format_number(total_services), StatKind::Number),
        StatItem::new("Entrypoints", format_number(entrypoints), StatKind::Number),
        StatItem::new(
            "Middlewares",
            format_number(overview.http.middlewares.total),
            StatKind::Number,
        ),
    ];
    let details = Details {
        http_routers: overview.http.routers.total,
        http_services: overview.http.services.total,
        http_middlewares: overview.http.middlewares.total,
        tcp_routers: overview.tcp.routers.total,
        tcp_services: overview.tcp.services.total,
        udp_routers: overview.udp.routers.total,
        udp_services: overview.udp.services.total,
        entrypoints,
        total_routers,
        total_services,
        warnings,
    };
    let status = if warnings > 0 {
        ServiceStatus::Degraded
    } else {
        ServiceStatus::Running
    };
    ServiceReport::new(status, summary, &details)
}

fn looks_like_overview(r: &ProbeResponse) -> bool {
    r.body.contains("\"http\"")
}

pub struct TraefikPlugin {
    client: reqwest::Client,
}

impl Default for TraefikPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl TraefikPlugin {
    pub fn new() -> Self {
        Self {
            client: http::api_client(false),
        }
    }
}

#[async_trait]
impl ServicePlugin for TraefikPlugin {
    fn id(&self) -> &'static str {
        "traefik"
    }

    fn name(&self) -> &'static str {
        "Traefik"
    }

    fn icon(&self) -> &'static str {
        "arrow.triangle.branch"
    }

    async fn detect(&self, env: &DetectionEnv) -> Option<DetectedService> {
        if let Some(c) = env.find_docker_image("traefik").filter(|c| c.is_running()) {
            let mut ports = c.host_ports.clone();
            ports.extend_from_slice(CONTAINER_FALLBACK_PORTS);
            if let Some(url) = env
                .probe_http_with(&ports, OVERVIEW_PATH, looks_like_overview)
                .await
            {
                info!(
                    plugin = self.id(),
                    via = "docker",
                    image = %c.image,
                    url = %url,
                    "Traefik found"
                );
                return Some(self.service_at(url));
            }
        }

        if env.has_process("traefik") {
            if let Some(url) = env
                .probe_http_with(PROCESS_PORTS, OVERVIEW_PATH, looks_like_overview)
                .await
            {
                info!(plugin = self.id(), via = "process", url = %url, "Traefik found");
                return Some(self.service_at(url));
            }
        }

        let url = env
            .probe_http_with(BLIND_PORTS, OVERVIEW_PATH, looks_like_overview)
            .await?;
        info!(plugin = self.id(), via = "port_probe", url = %url, "Traefik found");
        Some(self.service_at(url))
    }

    async fn collect(&self, svc: &DetectedService) -> Result<ServiceReport> {
        let overview: Overview =
            http::get_json(&self.client, &format!("{}{OVERVIEW_PATH}", svc.base_url)).await?;

        // Entrypoints are optional; older dashboards omit the endpoint.
        let entrypoints = http::get_json::<Vec<serde_json::Value>>(
            &self.client,
            &format!("{}/api/entrypoints", svc.base_url),
        )
        .await
        .map(|eps| eps.len() as i64)
        .unwrap_or(0);

        Ok(overview_report(&overview, entrypoints))
    }
}
