//! Auth service client: password grant, sign-up, refresh, logout, user.
//!
//! DESIGN
//! ======
//! Thin HTTP wrapper over `/auth/v1`. The client owns the one session slot
//! and is the only writer to it; every transition is announced on a
//! broadcast channel that the session store listens to. Response parsing is
//! kept in pure functions for testability.

use std::sync::Mutex;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::backend::AUTH_EVENT_CAPACITY;
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::types::{AuthChange, AuthChangeEvent, AuthResponse, Session, User};

// =============================================================================
// CLIENT
// =============================================================================

pub struct AuthApi {
    http: reqwest::Client,
    config: BackendConfig,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthChange>,
}

impl AuthApi {
    #[must_use]
    pub fn new(http: reqwest::Client, config: BackendConfig) -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self { http, config, session: Mutex::new(None), events }
    }

    /// Subscribe to auth-state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    /// Session slot contents without any refresh.
    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.session.lock().map(|slot| slot.clone()).unwrap_or(None)
    }

    /// Bearer token for table and realtime calls: the user's access token
    /// when signed in, the anonymous key otherwise.
    #[must_use]
    pub fn bearer_token(&self) -> String {
        self.current_session()
            .map_or_else(|| self.config.anon_key.clone(), |session| session.access_token)
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let text = self.post_json(&self.config.auth_url("/token?grant_type=password"), &body).await?;
        let session = parse_session(&text, now_unix())?;
        info!(user_id = %session.user.id, "signed in");
        let user = session.user.clone();
        self.store(Some(session.clone()), AuthChangeEvent::SignedIn);
        Ok(AuthResponse { session: Some(session), user: Some(user) })
    }

    pub async fn sign_up(&self, email: &str, password: &str, data: Value) -> Result<AuthResponse, BackendError> {
        let body = serde_json::json!({ "email": email, "password": password, "data": data });
        let text = self.post_json(&self.config.auth_url("/signup"), &body).await?;
        let response = parse_signup_response(&text, now_unix())?;
        if let Some(user) = &response.user {
            info!(user_id = %user.id, confirmed = response.session.is_some(), "signed up");
        }
        if let Some(session) = &response.session {
            self.store(Some(session.clone()), AuthChangeEvent::SignedIn);
        }
        Ok(response)
    }

    pub async fn sign_out(&self) -> Result<(), BackendError> {
        if let Some(session) = self.current_session() {
            let url = self.config.auth_url("/logout");
            debug!(%url, "auth request");
            let response = self
                .http
                .post(&url)
                .header("apikey", &self.config.anon_key)
                .bearer_auth(&session.access_token)
                .send()
                .await?;
            let status = response.status().as_u16();
            if !response.status().is_success() && !session_already_gone(status) {
                let text = response.text().await.unwrap_or_default();
                return Err(parse_auth_error(status, &text));
            }
        }
        info!("signed out");
        self.store(None, AuthChangeEvent::SignedOut);
        Ok(())
    }

    /// Current session, refreshed first when it is about to expire.
    pub async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };
        if session.is_expiring(now_unix(), margin_secs(&self.config)) {
            return self.refresh_session().await.map(Some);
        }
        Ok(Some(session))
    }

    pub async fn get_user(&self) -> Result<Option<User>, BackendError> {
        let Some(session) = self.get_session().await? else {
            return Ok(None);
        };
        let url = self.config.auth_url("/user");
        debug!(%url, "auth request");
        let response = self
            .http
            .get(&url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(parse_auth_error(status, &text));
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    /// Trade the refresh token for a new session.
    ///
    /// A rejected refresh token ends the session: the slot is cleared and
    /// `SignedOut` is announced.
    pub async fn refresh_session(&self) -> Result<Session, BackendError> {
        let Some(current) = self.current_session() else {
            return Err(BackendError::auth("Auth session missing!"));
        };
        let body = serde_json::json!({ "refresh_token": current.refresh_token });
        match self
            .post_json(&self.config.auth_url("/token?grant_type=refresh_token"), &body)
            .await
        {
            Ok(text) => {
                let session = parse_session(&text, now_unix())?;
                debug!(user_id = %session.user.id, "session refreshed");
                self.store(Some(session.clone()), AuthChangeEvent::TokenRefreshed);
                Ok(session)
            }
            Err(error @ BackendError::Auth { status: Some(400..=499), .. }) => {
                warn!(%error, "refresh token rejected; clearing session");
                self.store(None, AuthChangeEvent::SignedOut);
                Err(error)
            }
            Err(error) => Err(error),
        }
    }

    /// Refresh when the stored session is inside the expiry margin.
    /// Used by the background auto-refresh task.
    pub async fn refresh_if_expiring(&self) -> Result<(), BackendError> {
        let expiring = self
            .current_session()
            .is_some_and(|session| session.is_expiring(now_unix(), margin_secs(&self.config)));
        if expiring {
            self.refresh_session().await?;
        }
        Ok(())
    }

    fn store(&self, session: Option<Session>, event: AuthChangeEvent) {
        if let Ok(mut slot) = self.session.lock() {
            *slot = session.clone();
        }
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(AuthChange { event, session });
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<String, BackendError> {
        debug!(%url, "auth request");
        let response = self
            .http
            .post(url)
            .header("apikey", &self.config.anon_key)
            .json(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(parse_auth_error(status, &text));
        }
        Ok(text)
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn margin_secs(config: &BackendConfig) -> i64 {
    i64::try_from(config.refresh_margin.as_secs()).unwrap_or(i64::MAX)
}

/// Logout answers 401/403/404 when the session is already revoked or
/// unknown; the local session is cleared anyway.
fn session_already_gone(status: u16) -> bool {
    matches!(status, 401 | 403 | 404)
}

// =============================================================================
// PARSING
// =============================================================================

fn parse_session(json: &str, issued_at_unix: i64) -> Result<Session, BackendError> {
    let session: Session = serde_json::from_str(json).map_err(|e| BackendError::Decode(e.to_string()))?;
    Ok(session.with_expiry_from(issued_at_unix))
}

/// Sign-up answers with a full session when the account is confirmed
/// immediately, or with the bare user when email confirmation is pending.
fn parse_signup_response(json: &str, issued_at_unix: i64) -> Result<AuthResponse, BackendError> {
    let value: Value = serde_json::from_str(json).map_err(|e| BackendError::Decode(e.to_string()))?;
    if value.get("access_token").is_some() {
        let session = parse_session(json, issued_at_unix)?;
        let user = session.user.clone();
        return Ok(AuthResponse { session: Some(session), user: Some(user) });
    }
    let user_value = value.get("user").cloned().unwrap_or(value);
    if user_value.get("id").is_none() {
        return Ok(AuthResponse::default());
    }
    let user: User = serde_json::from_value(user_value).map_err(|e| BackendError::Decode(e.to_string()))?;
    Ok(AuthResponse { session: None, user: Some(user) })
}

/// Extract the human-readable message from an auth error body.
///
/// The service has used several shapes over time: `msg`,
/// `error_description`, `message` and `error`.
fn parse_auth_error(status: u16, body: &str) -> BackendError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["msg", "error_description", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(ToOwned::to_owned))
        })
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() { format!("auth request failed: {status}") } else { trimmed.to_owned() }
        });
    BackendError::Auth { message, status: Some(status) }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
