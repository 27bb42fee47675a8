//! In-process backend with the hosted service's observable contract.
//!
//! Accounts, profile rows, messages and the current session live in memory.
//! Every call is recorded, and a failure can be queued per operation, so
//! behavior around partial failures is reproducible without a network.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::{AUTH_EVENT_CAPACITY, Backend, FEED_CAPACITY, MessageFeed};
use crate::error::BackendError;
use crate::types::{AuthChange, AuthChangeEvent, AuthResponse, Message, NewMessage, Session, User, UserProfile};

const SESSION_LIFETIME_SECS: i64 = 3600;

/// Operations a [`MemoryBackend`] records and can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    SignIn,
    SignUp,
    SignOut,
    GetSession,
    GetUser,
    SelectMessages,
    InsertMessage,
    InsertProfile,
    SubscribeInserts,
}

struct Account {
    user: User,
    password: String,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    profiles: Vec<UserProfile>,
    messages: Vec<Message>,
    session: Option<Session>,
    calls: Vec<Op>,
    failures: HashMap<Op, String>,
    feeds: Vec<mpsc::Sender<Message>>,
}

pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<AuthChange>,
    require_confirmation: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Backend that confirms new accounts immediately (sign-up signs in).
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self { state: Mutex::new(MemoryState::default()), events, require_confirmation: false }
    }

    /// Backend where sign-up returns the user without a session until the
    /// email is confirmed.
    #[must_use]
    pub fn with_email_confirmation() -> Self {
        Self { require_confirmation: true, ..Self::new() }
    }

    /// Register an account directly, bypassing sign-up.
    pub fn add_account(&self, email: &str, password: &str) -> User {
        let user = new_user(email, Value::Object(serde_json::Map::new()));
        self.with_state(|state| {
            state
                .accounts
                .insert(email.to_owned(), Account { user: user.clone(), password: password.to_owned() });
        });
        user
    }

    /// Make the next call of `op` fail with `message`. The error variant is
    /// the one the hosted service would produce for that operation.
    pub fn fail_next(&self, op: Op, message: &str) {
        self.with_state(|state| {
            state.failures.insert(op, message.to_owned());
        });
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Op> {
        self.with_state(|state| state.calls.clone())
    }

    #[must_use]
    pub fn has_account(&self, email: &str) -> bool {
        self.with_state(|state| state.accounts.contains_key(email))
    }

    #[must_use]
    pub fn profiles(&self) -> Vec<UserProfile> {
        self.with_state(|state| state.profiles.clone())
    }

    /// Stored messages in insertion order.
    #[must_use]
    pub fn stored_messages(&self) -> Vec<Message> {
        self.with_state(|state| state.messages.clone())
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.with_state(|state| state.session.clone())
    }

    /// Push an auth notification as if the service had refreshed or revoked
    /// the session out of band.
    pub fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        self.with_state(|state| state.session.clone_from(&session));
        let _ = self.events.send(AuthChange { event, session });
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Record the call and take its queued failure, if any.
    fn enter(&self, op: Op) -> Result<(), BackendError> {
        let failure = self.with_state(|state| {
            state.calls.push(op);
            state.failures.remove(&op)
        });
        match failure {
            None => Ok(()),
            Some(message) => Err(match op {
                Op::SelectMessages => BackendError::query(message),
                Op::InsertMessage | Op::InsertProfile => BackendError::insert(message),
                Op::SubscribeInserts => BackendError::Realtime(message),
                _ => BackendError::Auth { message, status: Some(400) },
            }),
        }
    }

    fn start_session(&self, user: User) -> Session {
        let session = Session {
            access_token: Uuid::new_v4().simple().to_string(),
            refresh_token: Uuid::new_v4().simple().to_string(),
            token_type: "bearer".to_owned(),
            expires_in: SESSION_LIFETIME_SECS,
            expires_at: None,
            user,
        }
        .with_expiry_from(OffsetDateTime::now_utc().unix_timestamp());
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        session
    }
}

fn new_user(email: &str, metadata: Value) -> User {
    User {
        id: Uuid::new_v4(),
        email: Some(email.to_owned()),
        user_metadata: metadata,
        created_at: None,
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError> {
        self.enter(Op::SignIn)?;
        let user = self.with_state(|state| {
            state
                .accounts
                .get(email)
                .filter(|account| account.password == password)
                .map(|account| account.user.clone())
        });
        let Some(user) = user else {
            return Err(BackendError::Auth { message: "Invalid login credentials".to_owned(), status: Some(400) });
        };
        let session = self.start_session(user.clone());
        Ok(AuthResponse { session: Some(session), user: Some(user) })
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<AuthResponse, BackendError> {
        self.enter(Op::SignUp)?;
        let user = new_user(email, metadata);
        let created = self.with_state(|state| {
            if state.accounts.contains_key(email) {
                return false;
            }
            state
                .accounts
                .insert(email.to_owned(), Account { user: user.clone(), password: password.to_owned() });
            true
        });
        if !created {
            return Err(BackendError::Auth { message: "User already registered".to_owned(), status: Some(422) });
        }
        if self.require_confirmation {
            return Ok(AuthResponse { session: None, user: Some(user) });
        }
        let session = self.start_session(user.clone());
        Ok(AuthResponse { session: Some(session), user: Some(user) })
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.enter(Op::SignOut)?;
        self.emit(AuthChangeEvent::SignedOut, None);
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        self.enter(Op::GetSession)?;
        Ok(self.session())
    }

    async fn get_user(&self) -> Result<Option<User>, BackendError> {
        self.enter(Op::GetUser)?;
        Ok(self.session().map(|session| session.user))
    }

    async fn select_messages(&self) -> Result<Vec<Message>, BackendError> {
        self.enter(Op::SelectMessages)?;
        let mut rows = self.stored_messages();
        rows.sort_by_key(|row| row.created_at);
        Ok(rows)
    }

    async fn insert_message(&self, row: &NewMessage) -> Result<(), BackendError> {
        self.enter(Op::InsertMessage)?;
        let message = Message::from(row.clone());
        let feeds = self.with_state(|state| {
            state.messages.push(message.clone());
            state.feeds.retain(|feed| !feed.is_closed());
            state.feeds.clone()
        });
        for feed in feeds {
            let _ = feed.send(message.clone()).await;
        }
        Ok(())
    }

    async fn insert_profile(&self, row: &UserProfile) -> Result<(), BackendError> {
        self.enter(Op::InsertProfile)?;
        self.with_state(|state| {
            if state.profiles.iter().any(|profile| profile.id == row.id) {
                return Err(BackendError::Insert {
                    message: "duplicate key value violates unique constraint \"usuarios_pkey\"".to_owned(),
                    code: Some("23505".to_owned()),
                });
            }
            state.profiles.push(row.clone());
            Ok(())
        })
    }

    fn auth_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    async fn subscribe_message_inserts(&self) -> Result<MessageFeed, BackendError> {
        self.enter(Op::SubscribeInserts)?;
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        self.with_state(|state| state.feeds.push(tx));
        Ok(rx)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
