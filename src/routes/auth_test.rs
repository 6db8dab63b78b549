use super::*;
use crate::state::test_helpers;
use axum::http::header;
use std::sync::atomic::Ordering;

fn jar_with(name: &'static str, value: &str) -> CookieJar {
    CookieJar::new().add(Cookie::new(name, value.to_owned()))
}

fn location(resp: &Response) -> &str {
    resp.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn set_cookies(resp: &Response) -> Vec<String> {
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_owned))
        .collect()
}

// =============================================================================
// cookies
// =============================================================================

#[test]
fn session_cookie_is_http_only_lax() {
    let cookie = build_cookie(COOKIE_NAME, "abc".into(), true);
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.secure(), Some(true));
    assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    assert_eq!(cookie.path(), Some("/"));
}

#[test]
fn clear_cookie_expires_immediately() {
    let cookie = clear_cookie(PKCE_COOKIE_NAME, false);
    assert_eq!(cookie.value(), "");
    assert_eq!(cookie.max_age(), Some(Duration::ZERO));
}

// =============================================================================
// session_from_jar
// =============================================================================

#[tokio::test]
async fn no_cookie_is_no_session() {
    let (state, _backend) = test_helpers::test_app_state();
    assert!(session_from_jar(&state, &CookieJar::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_cookie_is_no_session() {
    let (state, _backend) = test_helpers::test_app_state();
    let jar = jar_with(COOKIE_NAME, "deadbeef");
    assert!(session_from_jar(&state, &jar).await.unwrap().is_none());
}

#[tokio::test]
async fn valid_cookie_resolves_user() {
    let (state, backend) = test_helpers::test_app_state();
    let token = test_helpers::seed_session(&state, &backend).await;
    let auth = session_from_jar(&state, &jar_with(COOKIE_NAME, &token))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(auth.user.id, backend.user.id);
    assert_eq!(auth.token, token);
}

// =============================================================================
// signin / callback
// =============================================================================

#[tokio::test]
async fn signin_sets_verifier_and_redirects_to_provider() {
    let (state, _backend) = test_helpers::test_app_state();
    let resp = signin(State(state)).await;

    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert!(location(&resp).starts_with("https://auth.test/authorize?provider=google"));
    let cookies = set_cookies(&resp);
    assert!(cookies.iter().any(|c| c.starts_with("pkce_verifier=") && c.contains("Max-Age=600")));
}

#[tokio::test]
async fn callback_success_sets_session_and_goes_to_bookmarks() {
    let (state, backend) = test_helpers::test_app_state();
    let params = CallbackParams { code: Some("code".into()), ..CallbackParams::default() };
    let resp = callback(State(state.clone()), jar_with(PKCE_COOKIE_NAME, "verifier"), Query(params)).await;

    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&resp), "/bookmarks");
    let cookies = set_cookies(&resp);
    assert!(
        cookies
            .iter()
            .any(|c| c.starts_with("session_token=") && c.contains("Max-Age=3600"))
    );
    assert!(cookies.iter().any(|c| c.starts_with("pkce_verifier=;") && c.contains("Max-Age=0")));

    let sessions = state.sessions.read().await;
    assert_eq!(sessions.len(), 1);
    assert!(sessions.values().all(|s| s.user.id == backend.user.id));
}

#[tokio::test]
async fn callback_failure_renders_message_page() {
    let (state, _backend) = test_helpers::test_app_state();
    let params = CallbackParams { code: Some("code".into()), ..CallbackParams::default() };
    let resp = callback(State(state.clone()), CookieJar::new(), Query(params)).await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("Your sign in attempt expired. Please try again."));
    assert!(html.contains(r#"content="3;url=/""#));
    assert!(state.sessions.read().await.is_empty());
}

// =============================================================================
// me / logout / ws-ticket
// =============================================================================

#[tokio::test]
async fn logout_removes_session_and_signs_out_upstream() {
    let (state, backend) = test_helpers::test_app_state();
    let token = test_helpers::seed_session(&state, &backend).await;

    let resp = logout(State(state.clone()), jar_with(COOKIE_NAME, &token))
        .await
        .into_response();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(set_cookies(&resp).iter().any(|c| c.contains("Max-Age=0")));
    assert!(state.sessions.read().await.is_empty());
    assert_eq!(backend.sign_out_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn logout_without_session_still_clears_cookie() {
    let (state, backend) = test_helpers::test_app_state();
    let resp = logout(State(state), CookieJar::new()).await.into_response();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(backend.sign_out_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ws_ticket_is_bound_to_session() {
    let (state, backend) = test_helpers::test_app_state();
    let token = test_helpers::seed_session(&state, &backend).await;
    let auth = session_from_jar(&state, &jar_with(COOKIE_NAME, &token))
        .await
        .unwrap()
        .unwrap();

    let Json(body) = ws_ticket(State(state.clone()), auth).await;
    let ticket = body["ticket"].as_str().unwrap();
    assert_eq!(session::consume_ws_ticket(&state, ticket).await, Some(token));
}

#[tokio::test]
async fn me_returns_session_user() {
    let (state, backend) = test_helpers::test_app_state();
    let token = test_helpers::seed_session(&state, &backend).await;
    let auth = session_from_jar(&state, &jar_with(COOKIE_NAME, &token))
        .await
        .unwrap()
        .unwrap();

    let Json(user) = me(auth).await;
    assert_eq!(user.name, "Ada Lovelace");
}
