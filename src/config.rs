//! Backend configuration parsed from environment variables.
//!
//! Only two values come from the environment: the service URL and the
//! anonymous API key. Everything else is a code-level knob with a default.

use std::time::Duration;

use crate::error::BackendError;

pub const URL_VAR: &str = "SUPABASE_URL";
pub const ANON_KEY_VAR: &str = "SUPABASE_ANON_KEY";
pub const DEFAULT_HEARTBEAT_SECS: u64 = 25;
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 90;
pub const DEFAULT_REFRESH_TICK_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Service base URL without trailing slash, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Public anonymous API key sent as `apikey` on every request.
    pub anon_key: String,
    /// Whole-request timeout. `None` keeps the HTTP client default.
    pub request_timeout: Option<Duration>,
    /// Connect timeout. `None` keeps the HTTP client default.
    pub connect_timeout: Option<Duration>,
    /// Interval between realtime heartbeats.
    pub heartbeat_interval: Duration,
    /// Refresh the session in the background before it expires.
    pub auto_refresh_token: bool,
    /// How long before `expires_at` a session counts as expiring.
    pub refresh_margin: Duration,
    /// How often the auto-refresh task checks the session.
    pub refresh_tick: Duration,
}

impl BackendConfig {
    /// Build a config with defaults for every optional knob.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Config`] if the URL is not http(s) or the key is empty.
    pub fn new(url: &str, anon_key: &str) -> Result<Self, BackendError> {
        let url = normalize_url(url)?;
        let anon_key = anon_key.trim();
        if anon_key.is_empty() {
            return Err(BackendError::Config(format!("{ANON_KEY_VAR} is empty")));
        }
        Ok(Self {
            url,
            anon_key: anon_key.to_owned(),
            request_timeout: None,
            connect_timeout: None,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            auto_refresh_token: true,
            refresh_margin: Duration::from_secs(DEFAULT_REFRESH_MARGIN_SECS),
            refresh_tick: Duration::from_secs(DEFAULT_REFRESH_TICK_SECS),
        })
    }

    /// Build config from the process environment, honoring a `.env` file.
    ///
    /// Required:
    /// - `SUPABASE_URL`
    /// - `SUPABASE_ANON_KEY`
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Config`] when either value is missing or invalid.
    pub fn from_env() -> Result<Self, BackendError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Config`] when either value is missing or invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BackendError> {
        let url = lookup(URL_VAR).ok_or_else(|| BackendError::Config(format!("{URL_VAR} not set")))?;
        let anon_key =
            lookup(ANON_KEY_VAR).ok_or_else(|| BackendError::Config(format!("{ANON_KEY_VAR} not set")))?;
        Self::new(&url, &anon_key)
    }

    #[must_use]
    pub fn with_timeouts(mut self, request: Option<Duration>, connect: Option<Duration>) -> Self {
        self.request_timeout = request;
        self.connect_timeout = connect;
        self
    }

    #[must_use]
    pub fn with_auto_refresh(mut self, enabled: bool) -> Self {
        self.auto_refresh_token = enabled;
        self
    }

    /// URL under the auth service, e.g. `auth_url("/signup")`.
    #[must_use]
    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{path}", self.url)
    }

    /// URL of a table endpoint, e.g. `rest_url("messages")`.
    #[must_use]
    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.url)
    }

    /// Websocket URL of the realtime service.
    #[must_use]
    pub fn realtime_url(&self) -> String {
        let ws_base = if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.url.clone()
        };
        format!("{ws_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0", self.anon_key)
    }
}

fn normalize_url(raw: &str) -> Result<String, BackendError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(BackendError::Config(format!("{URL_VAR} must be an http(s) URL, got '{raw}'")));
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
