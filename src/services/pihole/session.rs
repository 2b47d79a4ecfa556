// Pi-hole v6 session: sid/csrf pair with an expiry, owned by the plugin instance

use crate::services::error::{Result, ServiceError};
use crate::services::http;
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const SID_HEADER: &str = "X-FTL-SID";
pub const CSRF_HEADER: &str = "X-FTL-CSRF";

/// Validity assumed when the server reports none.
const DEFAULT_VALIDITY_SECS: i64 = 300;

/// Sessions are dropped this long before the server would expire them.
const EXPIRY_MARGIN_SECS: i64 = 10;

#[derive(Debug, Clone)]
pub struct Session {
    pub sid: String,
    pub csrf: String,
    expires_at: Instant,
}

impl Session {
    pub fn new(sid: String, csrf: String, validity_secs: i64) -> Self {
        Self {
            sid,
            csrf,
            expires_at: Instant::now() + lifetime(validity_secs),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.sid.is_empty() && Instant::now() < self.expires_at
    }
}

/// Usable lifetime of a session the server granted for `validity_secs`.
pub fn lifetime(validity_secs: i64) -> Duration {
    let validity = if validity_secs <= 0 {
        DEFAULT_VALIDITY_SECS
    } else {
        validity_secs
    };
    Duration::from_secs((validity - EXPIRY_MARGIN_SECS).max(0) as u64)
}

#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<Option<Session>>,
}

impl SessionStore {
    /// The cached session, if it has not expired.
    pub fn current(&self) -> Option<Session> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(Session::is_valid)
    }

    pub fn store(&self, session: Session) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    pub fn clear(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// `POST /api/auth` with the password and caches the new session.
    pub async fn authenticate(
        &self,
        client: &reqwest::Client,
        base_url: &str,
        password: &str,
    ) -> Result<Session> {
        let url = format!("{base_url}/api/auth");
        let req = client
            .post(&url)
            .json(&serde_json::json!({ "password": password }));
        let body = match http::send(&url, req).await {
            Ok(body) => body,
            Err(e) if e.is_unauthorized() => {
                return Err(ServiceError::AuthFailed("invalid Pi-hole password".into()));
            }
            Err(e) => return Err(e),
        };

        let resp: AuthResponse =
            serde_json::from_slice(&body).map_err(|e| ServiceError::malformed(&url, e))?;
        let granted = resp.session;
        let sid = granted.sid.unwrap_or_default();
        if !granted.valid || sid.is_empty() {
            return Err(ServiceError::AuthFailed("server returned an invalid session".into()));
        }

        let session = Session::new(sid, granted.csrf.unwrap_or_default(), granted.validity);
        tracing::info!(
            plugin = "pihole",
            validity_secs = granted.validity,
            "Pi-hole session acquired"
        );
        self.store(session.clone());
        Ok(session)
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    session: AuthSession,
}

#[derive(Debug, Deserialize)]
struct AuthSession {
    valid: bool,
    #[serde(default)]
    sid: Option<String>,
    #[serde(default)]
    csrf: Option<String>,
    #[serde(default)]
    validity: i64,
}
