//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! Rows live in the hosted backend; the server only keeps local sessions,
//! one-time websocket tickets, and the per-user live feeds in memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::services::session::SessionUser;
use crate::supabase::realtime::ChangeEvent;
use crate::supabase::{AuthApi, ProviderSession, TableApi};

// =============================================================================
// ROWS
// =============================================================================

/// One saved link. Mirrors the `bookmarks` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Insert payload for the `bookmarks` table. Id and timestamp are assigned
/// by the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBookmark {
    pub title: String,
    pub url: String,
    pub user_id: Uuid,
}

/// One row per user, created on first sign-in. Mirrors the `profiles` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

// =============================================================================
// SESSIONS
// =============================================================================

/// A signed-in browser session.
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub user: SessionUser,
    pub provider: ProviderSession,
    /// Local expiry, independent of the provider token lifetime.
    pub expires_at: Instant,
}

/// A one-time websocket ticket bound to a session.
#[derive(Debug, Clone)]
pub struct WsTicket {
    pub session_token: String,
    pub expires_at: Instant,
}

// =============================================================================
// FEEDS
// =============================================================================

/// Live connections of one user. Exists while at least one is open.
pub struct UserFeed {
    /// Connected clients: `client_id` -> sender for change events.
    pub clients: HashMap<Uuid, mpsc::Sender<ChangeEvent>>,
    /// Provider realtime subscription, if enabled.
    pub upstream: Option<JoinHandle<()>>,
}

impl UserFeed {
    #[must_use]
    pub fn new() -> Self {
        Self { clients: HashMap::new(), upstream: None }
    }
}

impl Default for UserFeed {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<dyn AuthApi>,
    pub tables: Arc<dyn TableApi>,
    /// Session token -> session.
    pub sessions: Arc<RwLock<HashMap<String, StoredSession>>>,
    /// Ticket -> session token.
    pub ws_tickets: Arc<RwLock<HashMap<String, WsTicket>>>,
    /// User id -> live connections.
    pub feeds: Arc<RwLock<HashMap<Uuid, UserFeed>>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, auth: Arc<dyn AuthApi>, tables: Arc<dyn TableApi>) -> Self {
        Self {
            config: Arc::new(config),
            auth,
            tables,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ws_tickets: Arc::new(RwLock::new(HashMap::new())),
            feeds: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
