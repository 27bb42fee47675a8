//! Application wiring: one backend, one session store, one gateway.
//!
//! Hosts build a [`ChatClient`] once at startup and hand out its parts. The
//! session store and (for the hosted backend) the auto-refresh task live for
//! the rest of the process.

use std::sync::Arc;

use tracing::info;

use crate::backend::{Backend, SupabaseBackend};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::gateway::ChatGateway;
use crate::login::{LoginForm, Navigator};
use crate::session_store::SessionStore;

pub struct ChatClient {
    backend: Arc<dyn Backend>,
    sessions: SessionStore,
    gateway: Arc<ChatGateway>,
}

impl ChatClient {
    /// Connect to the hosted service described by `config`.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn connect(config: BackendConfig) -> Result<Self, BackendError> {
        let url = config.url.clone();
        let auto_refresh = config.auto_refresh_token;
        let backend = SupabaseBackend::new(config)?;
        if auto_refresh {
            // Detached: the refresh loop runs for the process lifetime.
            drop(backend.spawn_auto_refresh());
        }
        info!(%url, auto_refresh, "chat backend configured");
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// [`Self::connect`] with config read from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Config`] when `SUPABASE_URL` or
    /// `SUPABASE_ANON_KEY` is missing or invalid.
    pub fn from_env() -> Result<Self, BackendError> {
        Self::connect(BackendConfig::from_env()?)
    }

    /// Wire an arbitrary backend. Must be called inside a tokio runtime.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        let sessions = SessionStore::spawn(Arc::clone(&backend));
        let gateway = Arc::new(ChatGateway::new(Arc::clone(&backend)));
        Self { backend, sessions, gateway }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<ChatGateway> {
        &self.gateway
    }

    /// Fresh form bound to this client's gateway.
    #[must_use]
    pub fn login_form(&self, navigator: Arc<dyn Navigator>) -> LoginForm {
        LoginForm::new(Arc::clone(&self.gateway), navigator)
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
