//! Table API client for `/rest/v1`.
//!
//! Only the two shapes the chat needs: an ordered full-table select and a
//! minimal-return insert. Filters, pagination and updates are not exposed.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::BackendConfig;
use crate::error::BackendError;

pub struct RestApi {
    http: reqwest::Client,
    config: BackendConfig,
}

impl RestApi {
    #[must_use]
    pub fn new(http: reqwest::Client, config: BackendConfig) -> Self {
        Self { http, config }
    }

    /// `select=*` over `table`, oldest first by `column`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Query`] when the service rejects the read or
    /// the body does not decode into `T`.
    pub async fn select_ascending<T: DeserializeOwned>(
        &self,
        table: &str,
        column: &str,
        bearer: &str,
    ) -> Result<Vec<T>, BackendError> {
        let url = select_url(&self.config, table, column);
        debug!(%url, "table select");
        let response = self
            .http
            .get(&url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(bearer)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            let (message, code) = parse_rest_error(status, &text);
            return Err(BackendError::Query { message, code });
        }
        serde_json::from_str(&text).map_err(|e| BackendError::Query { message: e.to_string(), code: None })
    }

    /// Insert `rows` (a single object or an array) without reading them back.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Insert`] when the service rejects the write.
    pub async fn insert<T: Serialize + ?Sized>(&self, table: &str, rows: &T, bearer: &str) -> Result<(), BackendError> {
        let url = self.config.rest_url(table);
        debug!(%url, "table insert");
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.config.anon_key)
            .header("Prefer", "return=minimal")
            .bearer_auth(bearer)
            .json(rows)
            .send()
            .await?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let text = response.text().await.unwrap_or_default();
            let (message, code) = parse_rest_error(status, &text);
            return Err(BackendError::Insert { message, code });
        }
        Ok(())
    }
}

fn select_url(config: &BackendConfig, table: &str, column: &str) -> String {
    format!("{}?select=*&order={column}.asc", config.rest_url(table))
}

/// Pull `message` and `code` out of a table API error body
/// (`{"code":"23505","message":"duplicate key ...","details":...}`).
fn parse_rest_error(status: u16, body: &str) -> (String, Option<String>) {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|value| value.get("code"))
        .and_then(|code| code.as_str().map(ToOwned::to_owned).or_else(|| code.as_i64().map(|n| n.to_string())));
    let message = parsed
        .as_ref()
        .and_then(|value| value.get("message"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() { format!("table request failed: {status}") } else { trimmed.to_owned() }
        });
    (message, code)
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
