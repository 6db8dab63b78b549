//! Session and WS-ticket management.
//!
//! ARCHITECTURE
//! ============
//! The browser holds an opaque session token in an HttpOnly cookie; the
//! provider's access and refresh tokens never leave the server. Websocket
//! upgrades use one-time short-lived tickets so the cookie is not needed on
//! the upgrade request.
//!
//! TRADE-OFFS
//! ==========
//! Sessions live in process memory, so a restart signs everyone out. The
//! provider remains the source of truth for identity; signing in again is
//! one redirect.

use std::fmt::Write;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::state::{AppState, StoredSession, WsTicket};
use crate::supabase::auth::unix_now;
use crate::supabase::{ProviderSession, ProviderUser, SupabaseError};

/// Refresh the provider token when it expires within this many seconds.
const REFRESH_MARGIN_SECS: i64 = 60;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Generate a short-lived 16-byte hex WS ticket.
#[must_use]
pub(crate) fn generate_ws_ticket() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Signed-in user as exposed to the browser.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SessionUser {
    /// Provider subject.
    pub id: Uuid,
    pub email: Option<String>,
    /// Display name.
    pub name: String,
    pub avatar_url: Option<String>,
}

impl SessionUser {
    #[must_use]
    pub fn from_provider(user: &ProviderUser) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.display_name(),
            avatar_url: user.user_metadata.avatar_url.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The provider session needed a refresh and the provider was unreachable.
    #[error("session refresh failed: {0}")]
    Refresh(#[from] SupabaseError),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Refresh(_) => "E_SESSION_REFRESH",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Refresh(e) => e.retryable(),
        }
    }
}

/// A validated session with a provider token that is good for at least
/// `REFRESH_MARGIN_SECS`.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub user: SessionUser,
    pub access_token: String,
}

/// Create a session for the given user, returning the token.
pub async fn create_session(state: &AppState, user: SessionUser, provider: ProviderSession) -> String {
    let token = generate_token();
    let stored = StoredSession { user, provider, expires_at: Instant::now() + state.config.session_ttl };
    state.sessions.write().await.insert(token.clone(), stored);
    token
}

/// Validate a session token and return the user plus a usable access token.
///
/// Expired local sessions and sessions whose refresh is rejected are removed
/// and yield `Ok(None)`.
///
/// # Errors
///
/// Returns the provider error if a refresh failed transiently; the session is
/// kept so a later request can retry.
pub async fn validate_session(state: &AppState, token: &str) -> Result<Option<ActiveSession>, SessionError> {
    let snapshot = {
        let sessions = state.sessions.read().await;
        let Some(stored) = sessions.get(token) else {
            return Ok(None);
        };
        stored.clone()
    };

    if snapshot.expires_at <= Instant::now() {
        state.sessions.write().await.remove(token);
        return Ok(None);
    }

    if snapshot.provider.expires_at - unix_now() > REFRESH_MARGIN_SECS {
        return Ok(Some(ActiveSession { user: snapshot.user, access_token: snapshot.provider.access_token }));
    }

    // Refresh outside the lock.
    match state
        .auth
        .refresh_session(&snapshot.provider.refresh_token)
        .await
    {
        Ok(fresh) => {
            let access_token = fresh.access_token.clone();
            if let Some(stored) = state.sessions.write().await.get_mut(token) {
                stored.provider = fresh;
            }
            info!(user_id = %snapshot.user.id, "session: provider token refreshed");
            Ok(Some(ActiveSession { user: snapshot.user, access_token }))
        }
        Err(e) if e.retryable() => {
            warn!(user_id = %snapshot.user.id, error = %e, "session: refresh failed, will retry");
            Err(SessionError::Refresh(e))
        }
        Err(e) => {
            warn!(user_id = %snapshot.user.id, error = %e, "session: refresh rejected, signing out");
            state.sessions.write().await.remove(token);
            Ok(None)
        }
    }
}

/// Whether `token` names a session that has not expired locally. Makes no
/// provider call.
pub async fn is_live(state: &AppState, token: &str) -> bool {
    state
        .sessions
        .read()
        .await
        .get(token)
        .is_some_and(|s| s.expires_at > Instant::now())
}

/// A usable provider access token for any live session of `user_id`.
///
/// Used by background tasks that act for a user without a request in hand.
///
/// # Errors
///
/// Returns the last refresh error if every candidate session failed
/// transiently.
pub async fn access_token_for_user(state: &AppState, user_id: Uuid) -> Result<Option<String>, SessionError> {
    let candidates: Vec<String> = state
        .sessions
        .read()
        .await
        .iter()
        .filter(|(_, s)| s.user.id == user_id)
        .map(|(token, _)| token.clone())
        .collect();

    let mut last_err = None;
    for token in candidates {
        match validate_session(state, &token).await {
            Ok(Some(active)) => return Ok(Some(active.access_token)),
            Ok(None) => {}
            Err(e) => last_err = Some(e),
        }
    }
    last_err.map_or(Ok(None), Err)
}

/// Delete a session by token, returning it if it existed.
pub async fn delete_session(state: &AppState, token: &str) -> Option<StoredSession> {
    let removed = state.sessions.write().await.remove(token);
    state
        .ws_tickets
        .write()
        .await
        .retain(|_, ticket| ticket.session_token != token);
    removed
}

/// Create a short-lived WS ticket bound to a session token.
pub async fn create_ws_ticket(state: &AppState, session_token: &str) -> String {
    let ticket = generate_ws_ticket();
    let entry = WsTicket {
        session_token: session_token.to_owned(),
        expires_at: Instant::now() + state.config.ws_ticket_ttl,
    };
    state.ws_tickets.write().await.insert(ticket.clone(), entry);
    ticket
}

/// Consume a WS ticket, returning its session token if it was valid.
pub async fn consume_ws_ticket(state: &AppState, ticket: &str) -> Option<String> {
    let entry = state.ws_tickets.write().await.remove(ticket)?;
    (entry.expires_at > Instant::now()).then_some(entry.session_token)
}

/// Drop expired sessions and tickets. Returns `(sessions, tickets)` removed.
pub async fn sweep_expired(state: &AppState) -> (usize, usize) {
    let now = Instant::now();
    let sessions_removed = {
        let mut sessions = state.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        before - sessions.len()
    };
    let tickets_removed = {
        let mut tickets = state.ws_tickets.write().await;
        let before = tickets.len();
        tickets.retain(|_, t| t.expires_at > now);
        before - tickets.len()
    };
    (sessions_removed, tickets_removed)
}

/// Spawn the background sweeper. Returns a handle for shutdown.
pub fn spawn_sweeper(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            let (sessions, tickets) = sweep_expired(&state).await;
            if sessions > 0 || tickets > 0 {
                info!(sessions, tickets, "session sweep removed expired entries");
            }
        }
    })
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
