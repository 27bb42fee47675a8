//! Realtime change feed over a Phoenix-channel websocket.
//!
//! ARCHITECTURE
//! ============
//! Each subscription owns one websocket and one channel. The initial connect
//! and join happen before [`RealtimeClient::subscribe_inserts`] returns, so a
//! rejected join surfaces to the caller. After that a spawned task pumps the
//! socket: it heartbeats, forwards decoded rows into a bounded channel and
//! reconnects with exponential backoff when the transport drops.
//!
//! TRADE-OFFS
//! ==========
//! Rows inserted while the socket is down are not replayed. The service
//! offers no cursor to resume from, so gap-filling would mean re-reading the
//! table, which callers can do themselves if they care.

pub mod protocol;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::backend::auth::AuthApi;
use crate::error::BackendError;
use protocol::{ChangeFilter, ChannelMessage, Inbound};

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 10_000;

// =============================================================================
// CLIENT
// =============================================================================

pub struct RealtimeClient {
    url: String,
    heartbeat_interval: Duration,
    auth: Arc<AuthApi>,
}

impl RealtimeClient {
    #[must_use]
    pub fn new(url: String, heartbeat_interval: Duration, auth: Arc<AuthApi>) -> Self {
        Self { url, heartbeat_interval, auth }
    }

    /// Join the INSERT feed of `schema.table` and stream decoded rows.
    ///
    /// Dropping the returned receiver leaves the channel and closes the socket.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Realtime`] if the first connect or join fails.
    pub async fn subscribe_inserts<T>(
        &self,
        schema: &str,
        table: &str,
        capacity: usize,
    ) -> Result<mpsc::Receiver<T>, BackendError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let channel = Channel {
            url: self.url.clone(),
            topic: protocol::channel_topic(schema, table),
            filter: ChangeFilter::inserts(schema, table),
            heartbeat_interval: self.heartbeat_interval,
            auth: Arc::clone(&self.auth),
            refs: AtomicU64::new(0),
        };
        let (socket, join_ref) = channel.connect_and_join().await?;
        info!(topic = %channel.topic, "realtime channel joined");

        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(run_channel(channel, socket, join_ref, tx));
        Ok(rx)
    }
}

// =============================================================================
// CHANNEL
// =============================================================================

struct Channel {
    url: String,
    topic: String,
    filter: ChangeFilter,
    heartbeat_interval: Duration,
    auth: Arc<AuthApi>,
    refs: AtomicU64,
}

enum PumpExit {
    ReceiverGone,
    Disconnected(String),
}

impl Channel {
    fn next_ref(&self) -> String {
        (self.refs.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    async fn connect_and_join(&self) -> Result<(WsStream, String), BackendError> {
        let (mut socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| BackendError::Realtime(format!("connect failed: {e}")))?;

        let join_ref = self.next_ref();
        let join = protocol::join_message(&self.topic, &self.filter, &self.auth.bearer_token(), &join_ref);
        send(&mut socket, &join).await?;

        let wait_reply = async {
            loop {
                let Some(frame) = socket.next().await else {
                    return Err(BackendError::Realtime("socket closed during join".to_owned()));
                };
                let frame = frame.map_err(|e| BackendError::Realtime(e.to_string()))?;
                let WsMessage::Text(text) = frame else {
                    continue;
                };
                let Ok(message) = protocol::decode(text.as_str()) else {
                    continue;
                };
                if let Inbound::JoinReply(result) = protocol::classify(&message, &self.topic, &join_ref) {
                    return result.map_err(|reason| BackendError::Realtime(format!("join rejected: {reason}")));
                }
            }
        };
        tokio::time::timeout(JOIN_TIMEOUT, wait_reply)
            .await
            .map_err(|_| BackendError::Realtime("timed out waiting for join reply".to_owned()))??;

        Ok((socket, join_ref))
    }

    /// Drive one connected socket until it drops or the receiver goes away.
    async fn pump<T: DeserializeOwned>(&self, socket: &mut WsStream, join_ref: &str, tx: &mpsc::Sender<T>) -> PumpExit {
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;
        let mut pending_heartbeat: Option<String> = None;

        loop {
            tokio::select! {
                () = tx.closed() => return PumpExit::ReceiverGone,
                _ = heartbeat.tick() => {
                    if pending_heartbeat.is_some() {
                        return PumpExit::Disconnected("heartbeat timeout".to_owned());
                    }
                    let msg_ref = self.next_ref();
                    if let Err(e) = send(socket, &protocol::heartbeat_message(&msg_ref)).await {
                        return PumpExit::Disconnected(e.to_string());
                    }
                    pending_heartbeat = Some(msg_ref);
                }
                frame = socket.next() => {
                    let text = match frame {
                        None => return PumpExit::Disconnected("socket closed".to_owned()),
                        Some(Err(e)) => return PumpExit::Disconnected(e.to_string()),
                        Some(Ok(WsMessage::Close(_))) => return PumpExit::Disconnected("close frame".to_owned()),
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(_)) => continue,
                    };
                    let message = match protocol::decode(text.as_str()) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(error = %e, "undecodable realtime frame");
                            continue;
                        }
                    };
                    match protocol::classify(&message, &self.topic, join_ref) {
                        Inbound::Insert(record) => match serde_json::from_value::<T>(record) {
                            Ok(row) => {
                                if tx.send(row).await.is_err() {
                                    return PumpExit::ReceiverGone;
                                }
                            }
                            Err(e) => warn!(topic = %self.topic, error = %e, "skipping undecodable row"),
                        },
                        Inbound::HeartbeatReply(msg_ref) => {
                            if pending_heartbeat.as_deref() == Some(msg_ref.as_str()) {
                                pending_heartbeat = None;
                            }
                        }
                        Inbound::ChannelLost(reason) => return PumpExit::Disconnected(reason),
                        Inbound::JoinReply(_) | Inbound::Ignored => {}
                    }
                }
            }
        }
    }
}

async fn run_channel<T: DeserializeOwned>(
    channel: Channel,
    mut socket: WsStream,
    mut join_ref: String,
    tx: mpsc::Sender<T>,
) {
    loop {
        match channel.pump(&mut socket, &join_ref, &tx).await {
            PumpExit::ReceiverGone => {
                let leave = protocol::leave_message(&channel.topic, &channel.next_ref(), &join_ref);
                let _ = send(&mut socket, &leave).await;
                let _ = socket.close(None).await;
                info!(topic = %channel.topic, "realtime channel left");
                return;
            }
            PumpExit::Disconnected(reason) => {
                warn!(topic = %channel.topic, %reason, "realtime connection lost; reconnecting");
            }
        }

        let mut backoff_ms = INITIAL_BACKOFF_MS;
        loop {
            tokio::select! {
                () = tx.closed() => return,
                () = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
            }
            match channel.connect_and_join().await {
                Ok((fresh, fresh_ref)) => {
                    socket = fresh;
                    join_ref = fresh_ref;
                    info!(topic = %channel.topic, "realtime channel rejoined");
                    break;
                }
                Err(e) => {
                    debug!(topic = %channel.topic, error = %e, backoff_ms, "rejoin failed");
                    backoff_ms = next_backoff(backoff_ms);
                }
            }
        }
    }
}

fn next_backoff(current_ms: u64) -> u64 {
    (current_ms * 2).min(MAX_BACKOFF_MS)
}

async fn send(socket: &mut WsStream, message: &ChannelMessage) -> Result<(), BackendError> {
    let text = protocol::encode(message).map_err(|e| BackendError::Realtime(e.to_string()))?;
    socket
        .send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| BackendError::Realtime(e.to_string()))
}

#[cfg(test)]
#[path = "realtime_test.rs"]
mod tests;
