//! Phoenix-channel JSON messages used by the realtime service.
//!
//! Every websocket text frame is one [`ChannelMessage`]. Outbound helpers
//! build the join/heartbeat/leave messages; [`classify`] turns an inbound
//! message into what the connection loop needs to act on.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const PHOENIX_TOPIC: &str = "phoenix";
pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";

/// A single message on the channel wire protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default)]
    pub join_ref: Option<String>,
}

/// Row-change filter sent in the join payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChangeFilter {
    pub event: String,
    pub schema: String,
    pub table: String,
}

impl ChangeFilter {
    #[must_use]
    pub fn inserts(schema: &str, table: &str) -> Self {
        Self { event: "INSERT".to_owned(), schema: schema.to_owned(), table: table.to_owned() }
    }
}

/// Channel topic for a table, e.g. `realtime:public:messages`.
#[must_use]
pub fn channel_topic(schema: &str, table: &str) -> String {
    format!("realtime:{schema}:{table}")
}

#[must_use]
pub fn join_message(topic: &str, filter: &ChangeFilter, access_token: &str, join_ref: &str) -> ChannelMessage {
    ChannelMessage {
        topic: topic.to_owned(),
        event: EVENT_JOIN.to_owned(),
        payload: json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [filter],
            },
            "access_token": access_token,
        }),
        msg_ref: Some(join_ref.to_owned()),
        join_ref: Some(join_ref.to_owned()),
    }
}

#[must_use]
pub fn heartbeat_message(msg_ref: &str) -> ChannelMessage {
    ChannelMessage {
        topic: PHOENIX_TOPIC.to_owned(),
        event: EVENT_HEARTBEAT.to_owned(),
        payload: json!({}),
        msg_ref: Some(msg_ref.to_owned()),
        join_ref: None,
    }
}

#[must_use]
pub fn leave_message(topic: &str, msg_ref: &str, join_ref: &str) -> ChannelMessage {
    ChannelMessage {
        topic: topic.to_owned(),
        event: EVENT_LEAVE.to_owned(),
        payload: json!({}),
        msg_ref: Some(msg_ref.to_owned()),
        join_ref: Some(join_ref.to_owned()),
    }
}

/// Serialize a message to its text frame.
///
/// # Errors
///
/// Returns a serde error if the payload cannot be serialized.
pub fn encode(message: &ChannelMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Parse a text frame.
///
/// # Errors
///
/// Returns a serde error for malformed frames.
pub fn decode(text: &str) -> Result<ChannelMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// What an inbound message means to the connection loop.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Reply to our join. `Err` carries the server's reason.
    JoinReply(Result<(), String>),
    /// Reply to a heartbeat with the given ref.
    HeartbeatReply(String),
    /// An inserted row matching our filter.
    Insert(Value),
    /// The server closed or errored our channel; a rejoin is needed.
    ChannelLost(String),
    /// Anything else (presence, system notices, other topics).
    Ignored,
}

/// Classify an inbound message for the channel `topic` joined with `join_ref`.
#[must_use]
pub fn classify(message: &ChannelMessage, topic: &str, join_ref: &str) -> Inbound {
    if message.topic == PHOENIX_TOPIC && message.event == EVENT_REPLY {
        return message.msg_ref.clone().map_or(Inbound::Ignored, Inbound::HeartbeatReply);
    }
    if message.topic != topic {
        return Inbound::Ignored;
    }

    match message.event.as_str() {
        EVENT_REPLY if message.msg_ref.as_deref() == Some(join_ref) => Inbound::JoinReply(reply_status(&message.payload)),
        EVENT_ERROR | EVENT_CLOSE => Inbound::ChannelLost(message.event.clone()),
        EVENT_POSTGRES_CHANGES => {
            let data = &message.payload["data"];
            let is_insert = data["type"].as_str().or_else(|| data["eventType"].as_str()) == Some("INSERT");
            match data.get("record") {
                Some(record) if is_insert => Inbound::Insert(record.clone()),
                _ => Inbound::Ignored,
            }
        }
        // Older servers push the change event name directly.
        "INSERT" => message.payload.get("record").cloned().map_or(Inbound::Ignored, Inbound::Insert),
        _ => Inbound::Ignored,
    }
}

fn reply_status(payload: &Value) -> Result<(), String> {
    if payload["status"].as_str() == Some("ok") {
        return Ok(());
    }
    let reason = payload["response"]["reason"]
        .as_str()
        .or_else(|| payload["response"]["message"].as_str())
        .unwrap_or("join rejected");
    Err(reason.to_owned())
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
