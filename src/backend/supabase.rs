//! Hosted-service backend: auth, tables and realtime behind one handle.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use super::auth::AuthApi;
use super::rest::RestApi;
use super::{Backend, FEED_CAPACITY, MESSAGES_TABLE, MessageFeed, PROFILES_TABLE, PUBLIC_SCHEMA};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::realtime::RealtimeClient;
use crate::types::{AuthChange, AuthResponse, Message, NewMessage, Session, User, UserProfile};

pub struct SupabaseBackend {
    config: BackendConfig,
    auth: Arc<AuthApi>,
    rest: RestApi,
    realtime: RealtimeClient,
}

impl SupabaseBackend {
    /// Build the HTTP client and the three service clients sharing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build()?;

        let auth = Arc::new(AuthApi::new(http.clone(), config.clone()));
        let rest = RestApi::new(http, config.clone());
        let realtime = RealtimeClient::new(config.realtime_url(), config.heartbeat_interval, Arc::clone(&auth));
        Ok(Self { config, auth, rest, realtime })
    }

    #[must_use]
    pub fn auth(&self) -> &AuthApi {
        &self.auth
    }

    /// Periodically refresh the session before it expires.
    ///
    /// Failures are logged and retried on the next tick; a rejected refresh
    /// token signs the user out (see [`AuthApi::refresh_session`]).
    #[must_use]
    pub fn spawn_auto_refresh(&self) -> JoinHandle<()> {
        let auth = Arc::clone(&self.auth);
        let tick = self.config.refresh_tick;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = auth.refresh_if_expiring().await {
                    warn!(error = %e, "session auto-refresh failed");
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl Backend for SupabaseBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError> {
        self.auth.sign_in_with_password(email, password).await
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<AuthResponse, BackendError> {
        self.auth.sign_up(email, password, metadata).await
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.auth.sign_out().await
    }

    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        self.auth.get_session().await
    }

    async fn get_user(&self) -> Result<Option<User>, BackendError> {
        self.auth.get_user().await
    }

    async fn select_messages(&self) -> Result<Vec<Message>, BackendError> {
        let bearer = self.auth.bearer_token();
        self.rest.select_ascending(MESSAGES_TABLE, "created_at", &bearer).await
    }

    async fn insert_message(&self, row: &NewMessage) -> Result<(), BackendError> {
        let bearer = self.auth.bearer_token();
        self.rest.insert(MESSAGES_TABLE, row, &bearer).await
    }

    async fn insert_profile(&self, row: &UserProfile) -> Result<(), BackendError> {
        let bearer = self.auth.bearer_token();
        self.rest.insert(PROFILES_TABLE, std::slice::from_ref(row), &bearer).await
    }

    fn auth_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.auth.subscribe()
    }

    async fn subscribe_message_inserts(&self) -> Result<MessageFeed, BackendError> {
        self.realtime
            .subscribe_inserts(PUBLIC_SCHEMA, MESSAGES_TABLE, FEED_CAPACITY)
            .await
    }
}
