//! Live feed — per-user fan-out of bookmark changes.
//!
//! ARCHITECTURE
//! ============
//! Every open bookmarks page holds one websocket connection, and each
//! connection registers an `mpsc` sender here. Changes reach a user's feed
//! from two sides:
//!
//! - local mutations made through this server (`publish` after a create or
//!   delete), and
//! - the provider's realtime channel, which also reports changes made by
//!   other servers or directly against the table.
//!
//! The first connection of a user starts one upstream realtime task; the
//! last one to leave stops it. Receivers reconcile events against their own
//! list, so a local publish and the provider's echo of the same change
//! collapse into one visible update.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::session;
use crate::state::{AppState, UserFeed};
use crate::supabase::realtime::{self, ChangeEvent, StreamEnd};

/// Capacity of each connection's change channel.
pub const CLIENT_CHANNEL_CAPACITY: usize = 64;

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

// =============================================================================
// JOIN / PART
// =============================================================================

/// Register a connection for `user_id`. Starts the upstream subscription if
/// realtime is enabled and the user has none running.
pub async fn join_feed(state: &AppState, user_id: Uuid, client_id: Uuid, tx: mpsc::Sender<ChangeEvent>) {
    let mut feeds = state.feeds.write().await;
    let feed = feeds.entry(user_id).or_insert_with(UserFeed::new);
    feed.clients.insert(client_id, tx);

    // A finished upstream stopped for lack of a session; this join may bring one.
    if state.config.supabase.realtime_enabled && feed.upstream.as_ref().is_none_or(JoinHandle::is_finished) {
        feed.upstream = Some(spawn_upstream(state.clone(), user_id));
    }
    info!(%user_id, %client_id, clients = feed.clients.len(), "client joined feed");
}

/// Remove a connection. The last connection of a user stops the upstream
/// subscription and drops the feed.
pub async fn part_feed(state: &AppState, user_id: Uuid, client_id: Uuid) {
    let mut feeds = state.feeds.write().await;
    let Some(feed) = feeds.get_mut(&user_id) else {
        return;
    };

    feed.clients.remove(&client_id);
    info!(%user_id, %client_id, remaining = feed.clients.len(), "client left feed");

    if feed.clients.is_empty() {
        if let Some(upstream) = feed.upstream.take() {
            upstream.abort();
        }
        feeds.remove(&user_id);
    }
}

// =============================================================================
// PUBLISH
// =============================================================================

/// Deliver a change to every connection of `user_id`, optionally excluding
/// one. Returns the number of connections that accepted it.
pub async fn publish(state: &AppState, user_id: Uuid, event: &ChangeEvent, exclude: Option<Uuid>) -> usize {
    let feeds = state.feeds.read().await;
    let Some(feed) = feeds.get(&user_id) else {
        return 0;
    };

    let mut delivered = 0;
    for (client_id, tx) in &feed.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: a full channel drops the event for that client.
        if tx.try_send(event.clone()).is_ok() {
            delivered += 1;
        }
    }
    delivered
}

// =============================================================================
// UPSTREAM
// =============================================================================

/// Next reconnect delay: doubled, capped.
#[must_use]
pub fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(BACKOFF_MAX)
}

/// Spawn the provider subscription for one user.
///
/// Each connection attempt uses a fresh access token from any of the
/// user's sessions. The task ends when the user has no usable session left
/// or when it is aborted by `part_feed`.
fn spawn_upstream(state: AppState, user_id: Uuid) -> JoinHandle<()> {
    tokio::spawn(async move {
        let socket_url = match realtime::socket_url(&state.config.supabase.url, &state.config.supabase.anon_key) {
            Ok(url) => url,
            Err(e) => {
                warn!(%user_id, error = %e, "realtime disabled for user");
                return;
            }
        };

        let (up_tx, mut up_rx) = mpsc::channel::<ChangeEvent>(CLIENT_CHANNEL_CAPACITY);
        let forward_state = state.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = up_rx.recv().await {
                publish(&forward_state, user_id, &event, None).await;
            }
        });

        let mut backoff = BACKOFF_INITIAL;
        loop {
            let access_token = match session::access_token_for_user(&state, user_id).await {
                Ok(Some(token)) => token,
                Ok(None) => {
                    info!(%user_id, "realtime: no live session, stopping");
                    break;
                }
                Err(e) => {
                    warn!(%user_id, error = %e, ?backoff, "realtime: token unavailable");
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                    continue;
                }
            };

            match realtime::stream_changes(&socket_url, user_id, &access_token, &up_tx).await {
                Ok(StreamEnd::Closed) => {
                    info!(%user_id, "realtime: socket closed, reconnecting");
                    backoff = BACKOFF_INITIAL;
                    tokio::time::sleep(backoff).await;
                }
                Ok(StreamEnd::ReceiverGone) => break,
                Err(e) => {
                    warn!(%user_id, error = %e, ?backoff, "realtime: stream failed");
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                }
            }
        }

        drop(up_tx);
        let _ = forwarder.await;
    })
}

#[cfg(test)]
#[path = "feed_test.rs"]
mod tests;
