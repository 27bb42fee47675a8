//! Backend seam: the hosted service the gateway talks to.
//!
//! ARCHITECTURE
//! ============
//! The hosted service is a fixed collaborator. [`Backend`] captures exactly
//! the calls the gateway and session store make against it, so the real
//! HTTP/websocket client ([`SupabaseBackend`]) and the in-process
//! [`MemoryBackend`] are interchangeable behind `Arc<dyn Backend>`.

pub mod auth;
pub mod memory;
pub mod rest;
pub mod supabase;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::error::BackendError;
use crate::types::{AuthChange, AuthResponse, Message, NewMessage, Session, User, UserProfile};

pub use memory::MemoryBackend;
pub use supabase::SupabaseBackend;

/// Table holding chat messages.
pub const MESSAGES_TABLE: &str = "messages";
/// Table holding one profile row per registered user.
pub const PROFILES_TABLE: &str = "usuarios";
/// Schema both tables live in.
pub const PUBLIC_SCHEMA: &str = "public";
/// Key under which sign-up stores the role in the user's auth metadata.
pub const ROLE_METADATA_KEY: &str = "rol";
/// Capacity of the auth-change broadcast channel.
pub const AUTH_EVENT_CAPACITY: usize = 32;
/// Capacity of a realtime insert feed.
pub const FEED_CAPACITY: usize = 256;

/// Newly inserted `messages` rows, in backend delivery order.
pub type MessageFeed = mpsc::Receiver<Message>;

/// Calls made against the hosted service. Enables swapping in an in-process
/// backend for tests.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Exchange email and password for a session.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Auth`] when the credentials are rejected.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError>;

    /// Create an auth identity carrying `metadata` as user metadata.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Auth`] when the identity cannot be created.
    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<AuthResponse, BackendError>;

    /// Revoke the current session.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Auth`] when the service rejects the request.
    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Session the client knows right now.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Auth`] when an expired session cannot be refreshed.
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;

    /// Current user as reported by the auth service, not a cached copy.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Auth`] when the service rejects the token.
    async fn get_user(&self) -> Result<Option<User>, BackendError>;

    /// All `messages` rows ordered by `created_at` ascending.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Query`] when the read fails.
    async fn select_messages(&self) -> Result<Vec<Message>, BackendError>;

    /// Insert one `messages` row.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Insert`] when the write is rejected.
    async fn insert_message(&self, row: &NewMessage) -> Result<(), BackendError>;

    /// Insert one `usuarios` row.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Insert`] when the write is rejected.
    async fn insert_profile(&self, row: &UserProfile) -> Result<(), BackendError>;

    /// Subscribe to auth-state notifications (sign-in, sign-out, refresh).
    fn auth_changes(&self) -> broadcast::Receiver<AuthChange>;

    /// Open a push feed of rows inserted into `messages`. Dropping the
    /// receiver closes the underlying channel.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Realtime`] when the channel cannot be joined.
    async fn subscribe_message_inserts(&self) -> Result<MessageFeed, BackendError>;
}
