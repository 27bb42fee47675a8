//! Domain types shared by the backend implementations, gateway and store.
//!
//! Wire names follow the backend's schema: the profile table stores the
//! role in column `rol`, and messages carry their author in `autor`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// AUTH
// =============================================================================

/// Authenticated identity as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    /// Auxiliary metadata supplied at sign-up (e.g. `{"rol": "student"}`).
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Backend-issued token bundle identifying an authenticated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds from issuance.
    pub expires_in: i64,
    /// Unix seconds at which the access token expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_owned()
}

impl Session {
    /// Fill `expires_at` from `expires_in` when the backend omitted it.
    #[must_use]
    pub fn with_expiry_from(mut self, issued_at_unix: i64) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = Some(issued_at_unix + self.expires_in);
        }
        self
    }

    /// True when the access token expires within `margin_secs` of `now_unix`.
    /// A session without a known expiry never counts as expiring.
    #[must_use]
    pub fn is_expiring(&self, now_unix: i64, margin_secs: i64) -> bool {
        self.expires_at.is_some_and(|at| at - now_unix <= margin_secs)
    }
}

/// Payload returned by sign-in and sign-up.
///
/// Sign-up returns a user without a session when the backend requires email
/// confirmation before the first login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub session: Option<Session>,
    pub user: Option<User>,
}

/// Kind of auth-state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Auth-state notification carrying the session after the transition.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChange {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}

// =============================================================================
// TABLE ROWS
// =============================================================================

/// Row of the `usuarios` table, written once at sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    /// Free-text classification supplied at registration.
    #[serde(rename = "rol")]
    pub role: String,
}

/// Row of the `messages` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    /// Author email. Null when the author had no email.
    #[serde(default)]
    pub autor: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: OffsetDateTime,
    /// Remaining backend columns (`id`, ...), kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Insert payload for the `messages` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub content: String,
    pub autor: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: OffsetDateTime,
}

impl NewMessage {
    /// Stamp `content` with the author and the current UTC time.
    #[must_use]
    pub fn stamped(content: impl Into<String>, autor: Option<String>) -> Self {
        Self { content: content.into(), autor, created_at: OffsetDateTime::now_utc() }
    }
}

impl From<NewMessage> for Message {
    fn from(row: NewMessage) -> Self {
        Self { content: row.content, autor: row.autor, created_at: row.created_at, extra: Map::new() }
    }
}

/// RFC 3339 timestamps. Reading also accepts offset-less values, which a
/// `timestamp without time zone` column produces, and treats them as UTC.
pub(crate) mod timestamp {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::{Iso8601, Rfc3339};
    use time::{OffsetDateTime, PrimitiveDateTime};

    pub fn serialize<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        let text = value.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<OffsetDateTime, String> {
        if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
            return Ok(value);
        }
        if let Ok(value) = OffsetDateTime::parse(raw, &Iso8601::DEFAULT) {
            return Ok(value);
        }
        PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT)
            .map(PrimitiveDateTime::assume_utc)
            .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
