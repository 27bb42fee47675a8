//! Client layer for a chat application on a hosted Supabase-style backend.
//!
//! The hosted service owns authentication, row storage and realtime change
//! delivery. This crate reaches it over HTTP and websocket, caches the auth
//! session for observers, and drives the login/registration form. There is
//! no entry point; a presentation layer embeds [`ChatClient`].

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod login;
pub mod realtime;
pub mod session_store;
pub mod types;

pub use backend::{Backend, MemoryBackend, SupabaseBackend};
pub use client::ChatClient;
pub use config::BackendConfig;
pub use error::BackendError;
pub use gateway::{ChatGateway, MessageSubscription};
pub use login::{FieldError, FormFlags, LoginForm, NavigationError, Navigator};
pub use session_store::{ListenerHandle, SessionStore};
pub use types::{AuthChange, AuthChangeEvent, AuthResponse, Message, NewMessage, Session, User, UserProfile};
