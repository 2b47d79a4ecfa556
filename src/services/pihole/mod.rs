// Pi-hole plugin (v5 summaryRaw API and v6 REST API with session auth)

mod session;

pub use session::{CSRF_HEADER, SID_HEADER, Session, SessionStore, lifetime};

use super::env::{DetectionEnv, ProbeResponse};
use super::error::{Result, ServiceError};
use super::format_number;
use super::http;
use super::plugin::{ServicePlugin, ServiceReport};
use crate::models::{DetectedService, ServiceStatus, StatItem, StatKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::{debug, info};

/// Metadata key carrying the web password, set through the detector's service config.
pub const PASSWORD_KEY: &str = "password";

const COMMON_PORTS: &[u16] = &[80, 8080, 443, 8443];
const CONTAINER_FALLBACK_PORTS: &[u16] = &[80, 8080];

/// Probe paths in order, with the body marker that identifies Pi-hole
/// and the API generation the path implies. `None` falls back to [`looks_like_admin`].
const PROBES: &[(&str, Option<&str>, &str)] = &[
    ("/admin/api.php?summaryRaw", Some("dns_queries_today"), "v5"),
    ("/api/dns/blocking", Some("\"blocking\""), "v6"),
    ("/api/auth", Some("\"session\""), "v6"),
    ("/admin/", None, ""),
];

/// Where a bare-metal install records its web port.
#[derive(Debug, Clone)]
pub struct ConfigFiles {
    pub pihole_toml: PathBuf,
    pub lighttpd: Vec<PathBuf>,
}

impl Default for ConfigFiles {
    fn default() -> Self {
        Self {
            pihole_toml: PathBuf::from("/etc/pihole/pihole.toml"),
            lighttpd: vec![
                PathBuf::from("/etc/lighttpd/external.conf"),
                PathBuf::from("/etc/lighttpd/lighttpd.conf"),
            ],
        }
    }
}

pub struct PiHolePlugin {
    client: reqwest::Client,
    sessions: SessionStore,
    config_files: ConfigFiles,
}

impl Default for PiHolePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl PiHolePlugin {
    pub fn new() -> Self {
        Self::with_config_files(ConfigFiles::default())
    }

    pub fn with_config_files(config_files: ConfigFiles) -> Self {
        Self {
            client: http::api_client(true),
            sessions: SessionStore::default(),
            config_files,
        }
    }

    async fn probe_api(
        &self,
        env: &DetectionEnv,
        ports: &[u16],
    ) -> Option<(String, &'static str)> {
        for &(path, marker, version) in PROBES {
            let accept = |r: &ProbeResponse| match marker {
                Some(marker) => r.body.contains(marker),
                None => looks_like_admin(r),
            };
            if let Some(url) = env.probe_http_with(ports, path, accept).await {
                return Some((url, version));
            }
        }
        None
    }

    fn detected_at(&self, url: String, version: &str) -> DetectedService {
        let mut svc = self.service_at(url);
        svc.version = version.to_string();
        svc
    }

    /// Web port from pihole.toml, falling back to lighttpd's `server.port`.
    async fn configured_port(&self) -> Option<u16> {
        if let Ok(content) = tokio::fs::read_to_string(&self.config_files.pihole_toml).await
            && let Some(port) = parse_webserver_port(&content)
        {
            return Some(port);
        }
        for path in &self.config_files.lighttpd {
            if let Ok(content) = tokio::fs::read_to_string(path).await
                && let Some(port) = parse_lighttpd_port(&content)
            {
                return Some(port);
            }
        }
        None
    }

    async fn fetch_v5(&self, base_url: &str) -> Result<ServiceReport> {
        let url = format!("{base_url}/admin/api.php?summaryRaw");
        let raw: Value = http::get_json(&self.client, &url).await?;
        v5_report(&raw).ok_or_else(|| ServiceError::malformed(&url, "not a Pi-hole v5 summary"))
    }

    async fn fetch_summary(
        &self,
        base_url: &str,
        session: Option<&Session>,
    ) -> Result<ServiceReport> {
        let url = format!("{base_url}/api/stats/summary");
        let mut req = self.client.get(&url);
        if let Some(s) = session {
            req = req.header(SID_HEADER, &s.sid).header(CSRF_HEADER, &s.csrf);
        }
        let body = http::send(&url, req).await?;
        let raw: Value =
            serde_json::from_slice(&body).map_err(|e| ServiceError::malformed(&url, e))?;
        v6_report(&raw).ok_or_else(|| ServiceError::malformed(&url, "missing queries object"))
    }

    async fn fetch_blocking(&self, base_url: &str) -> Result<String> {
        let url = format!("{base_url}/api/dns/blocking");
        let raw: Value = http::get_json(&self.client, &url).await?;
        raw.get("blocking")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ServiceError::malformed(&url, "missing blocking state"))
    }

    /// v6 summary: public first, then the cached session, then one fresh login.
    async fn collect_v6(&self, base_url: &str, password: Option<&str>) -> Result<ServiceReport> {
        match self.fetch_summary(base_url, None).await {
            Ok(report) => return Ok(report),
            Err(e) if e.is_unauthorized() => {}
            Err(e) => return Err(e),
        }

        if let Some(session) = self.sessions.current() {
            match self.fetch_summary(base_url, Some(&session)).await {
                Ok(report) => return Ok(report),
                Err(e) if e.is_unauthorized() => {
                    info!(plugin = "pihole", "cached session rejected, re-authenticating");
                    self.sessions.clear();
                }
                Err(e) => return Err(e),
            }
        }

        let password = password.ok_or(ServiceError::AuthRequired)?;
        let session = self
            .sessions
            .authenticate(&self.client, base_url, password)
            .await?;
        match self.fetch_summary(base_url, Some(&session)).await {
            Err(e) if e.is_unauthorized() => {
                self.sessions.clear();
                Err(ServiceError::AuthFailed(
                    "new session rejected by the summary endpoint".into(),
                ))
            }
            other => other,
        }
    }

    async fn post_blocking(
        &self,
        url: &str,
        body: &Value,
        session: Option<&Session>,
    ) -> Result<()> {
        let mut req = self.client.post(url).json(body);
        if let Some(s) = session {
            req = req.header(SID_HEADER, &s.sid).header(CSRF_HEADER, &s.csrf);
        }
        http::send(url, req).await.map(|_| ())
    }
}

#[async_trait]
impl ServicePlugin for PiHolePlugin {
    fn id(&self) -> &'static str {
        "pihole"
    }

    fn name(&self) -> &'static str {
        "Pi-hole"
    }

    fn icon(&self) -> &'static str {
        "shield.checkerboard"
    }

    async fn detect(&self, env: &DetectionEnv) -> Option<DetectedService> {
        if let Some(c) = env.find_docker_image("pihole").filter(|c| c.is_running()) {
            let mut ports = c.host_ports.clone();
            ports.extend_from_slice(CONTAINER_FALLBACK_PORTS);
            if let Some((url, version)) = self.probe_api(env, &ports).await {
                info!(
                    plugin = self.id(),
                    via = "docker",
                    image = %c.image,
                    url = %url,
                    "Pi-hole found"
                );
                return Some(self.detected_at(url, version));
            }
        }

        if !(env.has_process("pihole-FTL") || env.has_process_substring("pihole")) {
            return None;
        }

        let mut ports = env.find_process_ports("pihole-FTL");
        if ports.is_empty() {
            ports = env.find_process_ports_by_substring("pihole");
        }
        if !ports.is_empty()
            && let Some((url, version)) = self.probe_api(env, &ports).await
        {
            info!(plugin = self.id(), via = "process", url = %url, "Pi-hole found");
            return Some(self.detected_at(url, version));
        }

        if let Some(port) = self.configured_port().await
            && let Some((url, version)) = self.probe_api(env, &[port]).await
        {
            info!(plugin = self.id(), via = "config", url = %url, "Pi-hole found");
            return Some(self.detected_at(url, version));
        }

        if let Some((url, version)) = self.probe_api(env, COMMON_PORTS).await {
            info!(plugin = self.id(), via = "common_ports", url = %url, "Pi-hole found");
            return Some(self.detected_at(url, version));
        }

        debug!(plugin = self.id(), "process found but no API reachable");
        None
    }

    async fn collect(&self, svc: &DetectedService) -> Result<ServiceReport> {
        let base_url = svc.base_url.as_str();

        match self.fetch_v5(base_url).await {
            Ok(report) => return Ok(report),
            Err(e) => debug!(plugin = self.id(), error = %e, "v5 API unavailable"),
        }

        let v6_err = match self.collect_v6(base_url, svc.meta(PASSWORD_KEY)).await {
            Ok(report) => return Ok(report),
            Err(ServiceError::AuthRequired) => {
                let blocking = self.fetch_blocking(base_url).await.ok();
                return Ok(auth_required_report(blocking));
            }
            Err(e @ ServiceError::AuthFailed(_)) => return Err(e),
            Err(e) => e,
        };

        match self.fetch_blocking(base_url).await {
            Ok(blocking) => Ok(blocking_report(blocking)),
            Err(e) => {
                debug!(plugin = self.id(), error = %e, "public blocking endpoint unavailable");
                Err(v6_err)
            }
        }
    }

    async fn perform_action(
        &self,
        svc: &DetectedService,
        action: &str,
        params: &Map<String, Value>,
    ) -> Result<String> {
        if action != "setBlocking" {
            return Err(ServiceError::UnsupportedAction(action.to_string()));
        }
        if svc.version == "v5" {
            return Err(ServiceError::UnsupportedAction(format!(
                "{action} requires Pi-hole v6"
            )));
        }
        let params: SetBlocking = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| ServiceError::InvalidParams(e.to_string()))?;

        let url = format!("{}/api/dns/blocking", svc.base_url);
        let body = serde_json::json!({ "blocking": params.enabled, "timer": params.timer });
        let session = self.sessions.current();
        match self.post_blocking(&url, &body, session.as_ref()).await {
            Ok(()) => {}
            Err(e) if e.is_unauthorized() => {
                self.sessions.clear();
                let password = svc.meta(PASSWORD_KEY).ok_or(ServiceError::AuthRequired)?;
                let session = self
                    .sessions
                    .authenticate(&self.client, &svc.base_url, password)
                    .await?;
                if let Err(e) = self.post_blocking(&url, &body, Some(&session)).await {
                    if e.is_unauthorized() {
                        self.sessions.clear();
                        return Err(ServiceError::AuthFailed(
                            "new session rejected by the blocking endpoint".into(),
                        ));
                    }
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }

        Ok(params.describe())
    }
}

#[derive(Debug, Deserialize)]
struct SetBlocking {
    enabled: bool,
    #[serde(default)]
    timer: Option<u64>,
}

impl SetBlocking {
    fn describe(&self) -> String {
        match (self.enabled, self.timer) {
            (true, _) => "blocking enabled".to_string(),
            (false, Some(secs)) if secs > 0 => format!("blocking disabled for {secs}s"),
            (false, _) => "blocking disabled".to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct V5Details {
    queries_today: i64,
    ads_blocked_today: i64,
    ads_percent_today: f64,
    domains_blocked: i64,
    unique_clients: i64,
    queries_forwarded: i64,
    queries_cached: i64,
    unique_domains: i64,
    status: String,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct V6Details {
    queries_today: i64,
    ads_blocked_today: i64,
    ads_percent_today: f64,
    domains_blocked: i64,
    active_clients: i64,
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct BlockingDetails {
    blocking: String,
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthRequiredDetails {
    version: &'static str,
    auth_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocking: Option<String>,
}

/// Integer from a JSON number or a string such as "12,345".
fn as_i64(v: Option<&Value>) -> i64 {
    match v {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.replace(',', "").trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn as_f64(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn summary_items(
    queries: i64,
    blocked_percent: f64,
    on_blocklist: i64,
    clients: i64,
) -> Vec<StatItem> {
    vec![
        StatItem::new("Queries Today", format_number(queries), StatKind::Number),
        StatItem::new("Blocked", format!("{blocked_percent:.1}%"), StatKind::Percent),
        StatItem::new("On Blocklist", format_number(on_blocklist), StatKind::Number),
        StatItem::new("Clients", format_number(clients), StatKind::Number),
    ]
}

/// Report from a v5 `summaryRaw` body; `None` when the body is not one.
pub fn v5_report(raw: &Value) -> Option<ServiceReport> {
    let raw = raw.as_object()?;
    if !raw.contains_key("dns_queries_today") {
        return None;
    }
    let queries_today = as_i64(raw.get("dns_queries_today"));
    let ads_percent = as_f64(raw.get("ads_percentage_today"));
    let domains_blocked = as_i64(raw.get("domains_being_blocked"));
    let unique_clients = as_i64(raw.get("unique_clients"));
    let status = raw
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    // Missing status means an older build that always blocks.
    let health = if status.is_empty() || status == "enabled" {
        ServiceStatus::Running
    } else {
        ServiceStatus::Degraded
    };

    let details = V5Details {
        queries_today,
        ads_blocked_today: as_i64(raw.get("ads_blocked_today")),
        ads_percent_today: round1(ads_percent),
        domains_blocked,
        unique_clients,
        queries_forwarded: as_i64(raw.get("queries_forwarded")),
        queries_cached: as_i64(raw.get("queries_cached")),
        unique_domains: as_i64(raw.get("unique_domains")),
        status,
        version: "v5",
    };
    let summary = summary_items(queries_today, ads_percent, domains_blocked, unique_clients);
    Some(ServiceReport::new(health, summary, &details).with_version("v5"))
}

/// Report from a v6 `/api/stats/summary` body; `None` without a `queries` object.
pub fn v6_report(raw: &Value) -> Option<ServiceReport> {
    let queries = raw.get("queries")?.as_object()?;
    let total = as_i64(queries.get("total"));
    let blocked = as_i64(queries.get("blocked"));
    let blocked_percent = if total > 0 {
        blocked as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    let domains_blocked = as_i64(raw.pointer("/gravity/domains_being_blocked"));
    let active_clients = as_i64(raw.pointer("/clients/active"));

    let details = V6Details {
        queries_today: total,
        ads_blocked_today: blocked,
        ads_percent_today: round1(blocked_percent),
        domains_blocked,
        active_clients,
        status: "running",
        version: "v6",
    };
    let summary = summary_items(total, blocked_percent, domains_blocked, active_clients);
    Some(ServiceReport::new(ServiceStatus::Running, summary, &details).with_version("v6"))
}

/// Report from the public v6 blocking state; disabled blocking is degraded.
pub fn blocking_report(blocking: String) -> ServiceReport {
    let (status, label) = if blocking == "disabled" {
        (ServiceStatus::Degraded, "stopped")
    } else {
        (ServiceStatus::Running, "running")
    };
    let summary = vec![StatItem::new("DNS Blocking", blocking.clone(), StatKind::Status)];
    let details = BlockingDetails {
        blocking,
        status: label,
        version: "v6",
    };
    ServiceReport::new(status, summary, &details).with_version("v6")
}

/// Running but locked: the API wants a password nobody configured.
/// The web admin: a page naming Pi-hole, or a redirect that stays under `/admin`
/// (v6 sends `/admin/` to its login page).
pub fn looks_like_admin(r: &ProbeResponse) -> bool {
    if r.is_redirect() {
        return r.location.as_deref().is_some_and(|l| l.contains("/admin"));
    }
    r.body.to_lowercase().contains("pi-hole")
}

pub fn auth_required_report(blocking: Option<String>) -> ServiceReport {
    let mut summary = vec![
        StatItem::new("Version", "v6", StatKind::Text),
        StatItem::new("Status", "Running", StatKind::Status),
    ];
    if let Some(b) = &blocking {
        summary.push(StatItem::new("DNS Blocking", b.clone(), StatKind::Status));
    }
    let details = AuthRequiredDetails {
        version: "v6",
        auth_required: true,
        blocking,
    };
    ServiceReport::new(ServiceStatus::Running, summary, &details).with_version("v6")
}

/// First port of the `[webserver] port` setting, e.g. `"80o,443os,[::]:80o"` or `8080`.
pub fn parse_webserver_port(content: &str) -> Option<u16> {
    let table: toml::Table = toml::from_str(content).ok()?;
    match table.get("webserver")?.get("port")? {
        toml::Value::Integer(p) => u16::try_from(*p).ok().filter(|&p| p > 0),
        toml::Value::String(value) => {
            let first = value.split(',').next()?.trim();
            let port = first.rsplit_once(':').map_or(first, |(_, p)| p);
            let digits: String = port.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok().filter(|&p: &u16| p > 0)
        }
        _ => None,
    }
}

/// `server.port = 8080` from a lighttpd config.
pub fn parse_lighttpd_port(content: &str) -> Option<u16> {
    content.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("server.port")?;
        let (_, value) = rest.split_once('=')?;
        value.trim().parse().ok().filter(|&p: &u16| p > 0)
    })
}
