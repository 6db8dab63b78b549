//! Supabase — clients for the hosted auth, table, and realtime APIs.
//!
//! DESIGN
//! ======
//! Identity, storage, and change notification all live in the hosted
//! backend. Services talk to it through the `AuthApi` and `TableApi` traits so
//! tests can swap in an in-memory backend; `SupabaseClient` is the one real
//! implementation. Realtime uses a separate websocket connection and lives in
//! [`realtime`].

pub mod auth;
pub mod realtime;
pub mod rest;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SupabaseConfig;
use crate::state::{Bookmark, NewBookmark, UserProfile};

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by provider calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SupabaseError {
    /// The HTTP request could not be sent or the connection dropped.
    #[error("provider request failed: {0}")]
    Request(String),

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The response body did not match the expected shape.
    #[error("provider response parse failed: {0}")]
    Decode(String),

    /// The realtime websocket failed or the channel join was rejected.
    #[error("realtime channel failed: {0}")]
    Realtime(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl SupabaseError {
    /// HTTP status if the provider answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl crate::frame::ErrorCode for SupabaseError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Request(_) => "E_PROVIDER_REQUEST",
            Self::Api { .. } => "E_PROVIDER_RESPONSE",
            Self::Decode(_) => "E_PROVIDER_PARSE",
            Self::Realtime(_) => "E_REALTIME",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Request(_) | Self::Realtime(_) | Self::Api { status: 429 | 500..=599, .. }
        )
    }
}

// =============================================================================
// PROVIDER TYPES
// =============================================================================

/// Tokens issued by the provider for one signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry, unix seconds.
    pub expires_at: i64,
}

/// Free-form identity metadata copied from the OAuth provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Identity returned by the provider's user endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

impl ProviderUser {
    /// Best available display name: full name, then email local part.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.user_metadata
            .full_name
            .as_deref()
            .or(self.user_metadata.name.as_deref())
            .filter(|n| !n.trim().is_empty())
            .map(str::to_owned)
            .or_else(|| {
                self.email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .filter(|local| !local.is_empty())
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| "user".to_owned())
    }
}

/// Result of a profile insert. A concurrent insert for the same user is not
/// an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileInsert {
    Created,
    AlreadyExists,
}

// =============================================================================
// TRAITS
// =============================================================================

/// Hosted authentication endpoints.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// URL the browser is sent to in order to start the OAuth flow.
    fn authorize_url(&self, provider: &str, redirect_to: &str, code_challenge: &str) -> String;

    /// Exchange an authorization code plus PKCE verifier for a session.
    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<ProviderSession, SupabaseError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<ProviderSession, SupabaseError>;

    /// Fetch the user behind an access token.
    async fn fetch_user(&self, access_token: &str) -> Result<ProviderUser, SupabaseError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), SupabaseError>;
}

/// Hosted row storage, called with the end user's access token so row-level
/// security applies.
#[async_trait]
pub trait TableApi: Send + Sync {
    /// All bookmarks of `user_id`, newest first.
    async fn list_bookmarks(&self, access_token: &str, user_id: Uuid) -> Result<Vec<Bookmark>, SupabaseError>;

    async fn insert_bookmark(&self, access_token: &str, bookmark: &NewBookmark) -> Result<Bookmark, SupabaseError>;

    /// Returns `false` if no row matched.
    async fn delete_bookmark(&self, access_token: &str, id: Uuid) -> Result<bool, SupabaseError>;

    async fn fetch_profile(&self, access_token: &str, user_id: Uuid) -> Result<Option<UserProfile>, SupabaseError>;

    async fn insert_profile(&self, access_token: &str, profile: &UserProfile) -> Result<ProfileInsert, SupabaseError>;
}

// =============================================================================
// CLIENT
// =============================================================================

/// HTTP client for one Supabase project.
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    /// Build a client from typed config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: &SupabaseConfig) -> Result<Self, SupabaseError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SupabaseError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: config.url.trim_end_matches('/').to_string(), anon_key: config.anon_key.clone() })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Request carrying only the project API key.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.endpoint(path))
            .header("apikey", &self.anon_key)
    }

    /// Request on behalf of a signed-in user.
    fn authed(&self, method: Method, path: &str, access_token: &str) -> RequestBuilder {
        self.request(method, path).bearer_auth(access_token)
    }
}

/// Send a request, mapping transport failures.
async fn send(builder: RequestBuilder) -> Result<Response, SupabaseError> {
    builder
        .send()
        .await
        .map_err(|e| SupabaseError::Request(e.to_string()))
}

/// Fail on non-success statuses, extracting the provider's message.
async fn check_status(resp: Response) -> Result<Response, SupabaseError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(SupabaseError::Api { status, message: error_message(&body) })
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, SupabaseError> {
    let resp = check_status(resp).await?;
    resp.json::<T>()
        .await
        .map_err(|e| SupabaseError::Decode(e.to_string()))
}

/// Pull a human-readable message out of an auth or REST error body.
pub(crate) fn error_message(body: &str) -> String {
    const MAX_RAW: usize = 200;

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "msg", "error_description", "error"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    return text.to_owned();
                }
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no response body".to_owned();
    }
    trimmed.chars().take(MAX_RAW).collect()
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
