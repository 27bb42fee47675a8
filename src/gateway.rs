//! Chat gateway: the operations screens call.
//!
//! ARCHITECTURE
//! ============
//! A façade over [`Backend`]. Each operation is one request sequence to the
//! hosted service with no retries; errors propagate unchanged so the caller
//! decides what to surface.
//!
//! TRADE-OFFS
//! ==========
//! Sign-up is two writes (auth identity, then profile row) with no
//! compensation. If the profile insert fails the identity stays behind
//! without a profile; this is logged and returned as the insert error.

use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Backend, ROLE_METADATA_KEY};
use crate::error::BackendError;
use crate::types::{AuthResponse, Message, NewMessage, Session, UserProfile};

pub struct ChatGateway {
    backend: Arc<dyn Backend>,
}

impl ChatGateway {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Underlying backend handle, for calls the gateway does not wrap.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Auth`] when the credentials are rejected.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError> {
        self.backend.sign_in_with_password(email, password).await
    }

    /// Create the auth identity tagged with `role`, then its profile row.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Auth`] when the identity cannot be created and
    /// [`BackendError::Insert`] when the profile row is rejected. In the
    /// latter case the identity already exists.
    pub async fn sign_up(&self, email: &str, password: &str, role: &str) -> Result<AuthResponse, BackendError> {
        let response = self
            .backend
            .sign_up(email, password, json!({ ROLE_METADATA_KEY: role }))
            .await?;

        if let Some(user) = &response.user {
            let profile = UserProfile { id: user.id, email: email.to_owned(), role: role.to_owned() };
            if let Err(e) = self.backend.insert_profile(&profile).await {
                warn!(user_id = %user.id, error = %e, "auth identity created without profile row");
                return Err(e);
            }
            debug!(user_id = %user.id, role, "profile row created");
        }
        Ok(response)
    }

    /// Revoke the current session.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Auth`] when the service rejects the request.
    pub async fn sign_out(&self) -> Result<(), BackendError> {
        self.backend.sign_out().await
    }

    /// Session the backend knows right now, which can briefly differ from
    /// the session store's cached copy.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Auth`] when an expired session cannot be refreshed.
    pub async fn get_current_session(&self) -> Result<Option<Session>, BackendError> {
        self.backend.get_session().await
    }

    /// Every message, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Query`] when the read fails.
    pub async fn list_messages(&self) -> Result<Vec<Message>, BackendError> {
        self.backend.select_messages().await
    }

    /// Post `content` as the current user.
    ///
    /// The user is fetched from the auth service, not from any cache. The
    /// author column records the user's email.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotAuthenticated`] when nobody is signed in
    /// (before any insert is attempted) and [`BackendError::Insert`] when the
    /// row is rejected.
    pub async fn add_message(&self, content: &str) -> Result<(), BackendError> {
        let user = self.backend.get_user().await?.ok_or(BackendError::NotAuthenticated)?;
        let row = NewMessage::stamped(content, user.email);
        self.backend.insert_message(&row).await
    }

    /// Deliver each newly inserted message to `callback`, in arrival order,
    /// until the returned subscription is cancelled or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Realtime`] when the feed cannot be opened.
    pub async fn subscribe_messages<F>(&self, mut callback: F) -> Result<MessageSubscription, BackendError>
    where
        F: FnMut(Message) + Send + 'static,
    {
        let mut feed = self.backend.subscribe_message_inserts().await?;
        let task = tokio::spawn(async move {
            while let Some(message) = feed.recv().await {
                callback(message);
            }
            debug!("message feed closed");
        });
        info!("subscribed to message inserts");
        Ok(MessageSubscription { task })
    }
}

/// Live message subscription. Cancelling or dropping it stops delivery and
/// closes the realtime channel.
#[must_use = "dropping the subscription stops delivery"]
pub struct MessageSubscription {
    task: JoinHandle<()>,
}

impl MessageSubscription {
    pub fn cancel(self) {
        drop(self);
    }

    /// False once the feed has ended on its own or been cancelled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for MessageSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
#[path = "gateway_test.rs"]
mod tests;
