//! Auth routes — OAuth sign-in, callback, session management, WS tickets.

use axum::extract::{FromRef, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;
use tracing::warn;

use crate::routes::pages;
use crate::services::callback::{self, CallbackParams};
use crate::services::{auth as auth_svc, session};
use crate::state::AppState;

pub(crate) const COOKIE_NAME: &str = "session_token";
pub(crate) const PKCE_COOKIE_NAME: &str = "pkce_verifier";

fn build_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

fn clear_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    let mut cookie = build_cookie(name, String::new(), secure);
    cookie.set_max_age(Duration::ZERO);
    cookie
}

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated user extracted from the session cookie.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub user: session::SessionUser,
    /// Provider access token, fresh for at least a minute.
    pub access_token: String,
    /// Local session token from the cookie.
    pub token: String,
}

/// Resolve the session behind the cookie jar, if any.
///
/// # Errors
///
/// Returns the refresh error if the provider could not be reached.
pub(crate) async fn session_from_jar(
    state: &AppState,
    jar: &CookieJar,
) -> Result<Option<AuthUser>, session::SessionError> {
    let token = jar.get(COOKIE_NAME).map(Cookie::value).unwrap_or_default();
    if token.is_empty() {
        return Ok(None);
    }
    Ok(session::validate_session(state, token)
        .await?
        .map(|active| AuthUser { user: active.user, access_token: active.access_token, token: token.to_owned() }))
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let app_state = AppState::from_ref(state);
        session_from_jar(&app_state, &jar)
            .await
            .map_err(|e| {
                warn!(error = %e, "session validation failed");
                StatusCode::BAD_GATEWAY
            })?
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /auth/signin` — remember a PKCE verifier and redirect to the provider.
pub async fn signin(State(state): State<AppState>) -> Response {
    let sign_in = auth_svc::begin_sign_in(&state);
    let mut cookie = build_cookie(PKCE_COOKIE_NAME, sign_in.verifier, state.config.cookie_secure);
    cookie.set_max_age(Duration::minutes(10));

    let jar = CookieJar::new().add(cookie);
    (jar, Redirect::temporary(&sign_in.redirect_url)).into_response()
}

/// `GET /auth/callback` — finish sign-in, set the session cookie, and go to
/// `/bookmarks`. Failures render a message and return home after a delay.
pub async fn callback(State(state): State<AppState>, jar: CookieJar, Query(params): Query<CallbackParams>) -> Response {
    let secure = state.config.cookie_secure;
    let verifier = jar.get(PKCE_COOKIE_NAME).map(|c| c.value().to_owned());
    let jar = jar.add(clear_cookie(PKCE_COOKIE_NAME, secure));

    match callback::run(&state, params, verifier).await {
        Ok(outcome) => {
            let user = session::SessionUser::from_provider(&outcome.user);
            let token = session::create_session(&state, user, outcome.session).await;
            let mut cookie = build_cookie(COOKIE_NAME, token, secure);
            cookie.set_max_age(Duration::try_from(state.config.session_ttl).unwrap_or(Duration::WEEK));
            (jar.add(cookie), Redirect::temporary("/bookmarks")).into_response()
        }
        Err(failure) => {
            let page = pages::render_callback_error(&failure.message(), state.config.callback.error_redirect_secs);
            (jar, page).into_response()
        }
    }
}

/// `GET /api/auth/me` — return current user.
pub async fn me(auth: AuthUser) -> Json<session::SessionUser> {
    Json(auth.user)
}

/// `POST /api/auth/logout` — end the provider session (best-effort), delete
/// the local session, clear cookie.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Some(token) = jar.get(COOKIE_NAME).map(Cookie::value) {
        if let Some(stored) = session::delete_session(&state, token).await {
            if let Err(e) = state.auth.sign_out(&stored.provider.access_token).await {
                warn!(user_id = %stored.user.id, error = %e, "provider sign-out failed");
            }
        }
    }

    let jar = CookieJar::new().add(clear_cookie(COOKIE_NAME, state.config.cookie_secure));
    (jar, StatusCode::NO_CONTENT)
}

/// `POST /api/auth/ws-ticket` — create a one-time WS ticket.
pub async fn ws_ticket(State(state): State<AppState>, auth: AuthUser) -> Json<serde_json::Value> {
    let ticket = session::create_ws_ticket(&state, &auth.token).await;
    Json(serde_json::json!({ "ticket": ticket }))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
