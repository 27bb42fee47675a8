//! Error taxonomy for backend operations.
//!
//! ERROR HANDLING
//! ==============
//! Gateway operations never retry or compensate. Whatever the backend
//! reports is carried here unchanged so the caller (usually the login form)
//! decides what to show.

/// Errors produced by backend and gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Credential or session failure reported by the auth service.
    #[error("{message}")]
    Auth { message: String, status: Option<u16> },

    /// A table write was rejected (constraint violation, RLS policy, ...).
    #[error("{message}")]
    Insert { message: String, code: Option<String> },

    /// A table read failed.
    #[error("{message}")]
    Query { message: String, code: Option<String> },

    /// No authenticated user is available for an operation that needs one.
    #[error("user not authenticated")]
    NotAuthenticated,

    /// A required configuration value is missing or malformed.
    #[error("config error: {0}")]
    Config(String),

    /// The HTTP transport failed before a response was received.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A response body could not be decoded.
    #[error("response decode failed: {0}")]
    Decode(String),

    /// The realtime websocket failed or rejected a channel join.
    #[error("realtime error: {0}")]
    Realtime(String),
}

impl BackendError {
    /// Build an auth error without an HTTP status.
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth { message: message.into(), status: None }
    }

    /// Build an insert error without a backend code.
    #[must_use]
    pub fn insert(message: impl Into<String>) -> Self {
        Self::Insert { message: message.into(), code: None }
    }

    /// Build a query error without a backend code.
    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query { message: message.into(), code: None }
    }

    /// User-facing message text, or `None` when the error carries no text.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        let text = self.to_string();
        if text.trim().is_empty() { None } else { Some(text) }
    }

    /// True for credential/session failures, including the locally
    /// synthesized "not authenticated" case.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::NotAuthenticated)
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
