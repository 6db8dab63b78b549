//! Realtime — row change notifications over the provider's Phoenix channels.
//!
//! PROTOCOL
//! ========
//! One websocket per subscribed user. After connecting, the client joins
//! `realtime:bookmarks:{user_id}` with a `postgres_changes` binding filtered
//! on `user_id`, then must heartbeat on the `phoenix` topic or the server
//! drops the socket. Change notifications arrive as `postgres_changes`
//! events whose `data.type` is `INSERT`, `UPDATE`, or `DELETE`.
//!
//! This module owns a single connection attempt; reconnecting and token
//! refresh belong to the feed service.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::SupabaseError;
use crate::state::Bookmark;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const PROTOCOL_VERSION: &str = "1.0.0";

// =============================================================================
// TYPES
// =============================================================================

/// Phoenix channel envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

/// A row change of the `bookmarks` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert(Bookmark),
    Update(Bookmark),
    Delete(Uuid),
}

impl ChangeEvent {
    /// Id of the affected row.
    #[must_use]
    pub fn bookmark_id(&self) -> Uuid {
        match self {
            Self::Insert(b) | Self::Update(b) => b.id,
            Self::Delete(id) => *id,
        }
    }
}

/// Why a subscription stream ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The provider closed the socket.
    Closed,
    /// Nobody is listening for events anymore.
    ReceiverGone,
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Websocket endpoint for a project base URL.
///
/// # Errors
///
/// Returns an error if `base_url` is not an http(s) URL.
pub fn socket_url(base_url: &str, anon_key: &str) -> Result<String, SupabaseError> {
    let mut url = url::Url::parse(base_url).map_err(|e| SupabaseError::Realtime(format!("bad base url: {e}")))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(SupabaseError::Realtime(format!("unsupported scheme: {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| SupabaseError::Realtime("cannot switch to websocket scheme".into()))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", PROTOCOL_VERSION);
    Ok(url.into())
}

#[must_use]
pub fn topic_for(user_id: Uuid) -> String {
    format!("realtime:bookmarks:{user_id}")
}

/// Channel join carrying the change filter and the user's token.
#[must_use]
pub fn join_message(user_id: Uuid, access_token: &str, reference: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic_for(user_id),
        event: "phx_join".into(),
        payload: serde_json::json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": "bookmarks",
                    "filter": format!("user_id=eq.{user_id}"),
                }],
            },
            "access_token": access_token,
        }),
        reference: Some(reference.to_owned()),
    }
}

#[must_use]
pub fn heartbeat_message(reference: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: "phoenix".into(),
        event: "heartbeat".into(),
        payload: serde_json::json!({}),
        reference: Some(reference.to_owned()),
    }
}

/// Decode a change notification. `Ok(None)` for every other event.
///
/// # Errors
///
/// Returns `Decode` if a `postgres_changes` payload has an unexpected shape.
pub fn parse_change(msg: &PhoenixMessage) -> Result<Option<ChangeEvent>, SupabaseError> {
    if msg.event != "postgres_changes" {
        return Ok(None);
    }
    let data = msg
        .payload
        .get("data")
        .ok_or_else(|| SupabaseError::Decode("postgres_changes without data".into()))?;
    let kind = data.get("type").and_then(|v| v.as_str()).unwrap_or_default();

    let record = |key: &str| -> Result<Bookmark, SupabaseError> {
        let value = data
            .get(key)
            .cloned()
            .ok_or_else(|| SupabaseError::Decode(format!("{kind} without {key}")))?;
        serde_json::from_value(value).map_err(|e| SupabaseError::Decode(e.to_string()))
    };

    match kind {
        "INSERT" => Ok(Some(ChangeEvent::Insert(record("record")?))),
        "UPDATE" => Ok(Some(ChangeEvent::Update(record("record")?))),
        "DELETE" => {
            let id = data
                .get("old_record")
                .and_then(|old| old.get("id"))
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| SupabaseError::Decode("DELETE without old_record.id".into()))?;
            Ok(Some(ChangeEvent::Delete(id)))
        }
        other => Err(SupabaseError::Decode(format!("unknown change type: {other}"))),
    }
}

/// `Some(reason)` if `msg` is a rejection of our join or a channel error.
fn channel_failure(msg: &PhoenixMessage, topic: &str, join_ref: &str) -> Option<String> {
    if msg.topic != topic {
        return None;
    }
    match msg.event.as_str() {
        "phx_reply" if msg.reference.as_deref() == Some(join_ref) => {
            let status = msg.payload.get("status").and_then(|v| v.as_str());
            if status == Some("ok") {
                None
            } else {
                Some(format!("join rejected: {}", msg.payload.get("response").unwrap_or(&serde_json::Value::Null)))
            }
        }
        "phx_error" => Some("channel error".into()),
        "phx_close" => Some("channel closed by server".into()),
        _ => None,
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// Connect, join, and forward change events to `tx` until the socket closes
/// or `tx` is dropped.
///
/// # Errors
///
/// Returns `Realtime` on connect failure, join rejection, or socket error.
pub async fn stream_changes(
    socket_url: &str,
    user_id: Uuid,
    access_token: &str,
    tx: &mpsc::Sender<ChangeEvent>,
) -> Result<StreamEnd, SupabaseError> {
    stream_with_heartbeat(socket_url, user_id, access_token, tx, HEARTBEAT_INTERVAL).await
}

async fn stream_with_heartbeat(
    socket_url: &str,
    user_id: Uuid,
    access_token: &str,
    tx: &mpsc::Sender<ChangeEvent>,
    heartbeat_every: Duration,
) -> Result<StreamEnd, SupabaseError> {
    let (socket, _) = tokio_tungstenite::connect_async(socket_url)
        .await
        .map_err(|e| SupabaseError::Realtime(e.to_string()))?;
    let (mut write, mut read) = socket.split();

    let topic = topic_for(user_id);
    let mut next_ref: u64 = 1;
    let join_ref = next_ref.to_string();
    send_message(&mut write, &join_message(user_id, access_token, &join_ref)).await?;
    info!(%user_id, "realtime: joined bookmark changes");

    let mut heartbeat = tokio::time::interval(heartbeat_every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                next_ref += 1;
                send_message(&mut write, &heartbeat_message(&next_ref.to_string())).await?;
            }
            () = tx.closed() => {
                let _ = write.close().await;
                return Ok(StreamEnd::ReceiverGone);
            }
            incoming = read.next() => {
                let Some(incoming) = incoming else {
                    return Ok(StreamEnd::Closed);
                };
                let text = match incoming.map_err(|e| SupabaseError::Realtime(e.to_string()))? {
                    Message::Text(text) => text,
                    Message::Close(_) => return Ok(StreamEnd::Closed),
                    _ => continue,
                };
                let msg: PhoenixMessage = match serde_json::from_str(text.as_str()) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(%user_id, error = %e, "realtime: undecodable message");
                        continue;
                    }
                };
                if let Some(reason) = channel_failure(&msg, &topic, &join_ref) {
                    return Err(SupabaseError::Realtime(reason));
                }
                match parse_change(&msg) {
                    Ok(Some(event)) => {
                        debug!(%user_id, id = %event.bookmark_id(), "realtime: change received");
                        if tx.send(event).await.is_err() {
                            return Ok(StreamEnd::ReceiverGone);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(%user_id, error = %e, "realtime: bad change payload"),
                }
            }
        }
    }
}

async fn send_message<S>(write: &mut S, msg: &PhoenixMessage) -> Result<(), SupabaseError>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(msg).map_err(|e| SupabaseError::Decode(e.to_string()))?;
    write
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| SupabaseError::Realtime(e.to_string()))
}

#[cfg(test)]
#[path = "realtime_test.rs"]
mod tests;
