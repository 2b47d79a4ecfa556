// Shared HTTP plumbing for plugins: client construction and bounded body reads

use super::error::{Result, ServiceError};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Timeout for plugin API calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a single detection probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest response body a plugin will read.
pub const MAX_BODY_BYTES: usize = 1 << 20;

/// API client for plugins. `insecure` accepts self-signed certificates.
pub fn api_client(insecure: bool) -> reqwest::Client {
    build_client(
        reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(insecure),
    )
}

/// Probe client: short timeout and redirects are reported, not followed.
pub fn probe_client() -> reqwest::Client {
    build_client(
        reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none()),
    )
}

fn build_client(builder: reqwest::ClientBuilder) -> reqwest::Client {
    builder.build().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "HTTP client builder failed, using defaults");
        reqwest::Client::new()
    })
}

/// Reads at most `limit` bytes of the body; the rest is discarded.
pub async fn read_limited(mut resp: reqwest::Response, limit: usize) -> reqwest::Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        let room = limit.saturating_sub(body.len());
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= limit {
            break;
        }
    }
    Ok(body)
}

/// Sends a prepared request and returns the body of a 200 response.
pub async fn send(url: &str, req: reqwest::RequestBuilder) -> Result<Vec<u8>> {
    let resp = req.send().await.map_err(|e| request_error(url, e))?;
    let status = resp.status().as_u16();
    if status != 200 {
        return Err(ServiceError::Status {
            url: url.to_string(),
            status,
        });
    }
    read_limited(resp, MAX_BODY_BYTES)
        .await
        .map_err(|e| request_error(url, e))
}

pub async fn get_body(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    send(url, client.get(url)).await
}

pub async fn get_json<T: DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T> {
    let body = get_body(client, url).await?;
    serde_json::from_slice(&body).map_err(|e| ServiceError::malformed(url, e))
}

fn request_error(url: &str, source: reqwest::Error) -> ServiceError {
    if source.is_timeout() {
        return ServiceError::Timeout(REQUEST_TIMEOUT);
    }
    ServiceError::Request {
        url: url.to_string(),
        source,
    }
}
