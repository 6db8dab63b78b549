use super::*;
use crate::routes::auth::{COOKIE_NAME, session_from_jar};
use crate::services::bookmark::ValidationError;
use crate::state::test_helpers;
use crate::supabase::SupabaseError;
use axum_extra::extract::cookie::{Cookie, CookieJar};

async fn signed_in() -> (AppState, std::sync::Arc<test_helpers::MockBackend>, String) {
    let (state, backend) = test_helpers::test_app_state();
    let token = test_helpers::seed_session(&state, &backend).await;
    (state, backend, token)
}

async fn auth_for(state: &AppState, token: &str) -> AuthUser {
    let jar = CookieJar::new().add(Cookie::new(COOKIE_NAME, token.to_owned()));
    session_from_jar(state, &jar).await.unwrap().unwrap()
}

// =============================================================================
// error mapping
// =============================================================================

#[test]
fn errors_map_to_statuses() {
    assert_eq!(
        bookmark_error_to_status(&BookmarkError::Validation(ValidationError::MissingFields)),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(bookmark_error_to_status(&BookmarkError::NotFound(Uuid::nil())), StatusCode::NOT_FOUND);
    assert_eq!(
        bookmark_error_to_status(&BookmarkError::Backend(SupabaseError::Request("down".into()))),
        StatusCode::BAD_GATEWAY
    );
    assert_eq!(
        bookmark_error_to_status(&BookmarkError::Backend(SupabaseError::Api {
            status: 401,
            message: "JWT expired".into()
        })),
        StatusCode::UNAUTHORIZED
    );
}

#[test]
fn validation_error_body_carries_form_message() {
    let (status, Json(body)) = bookmark_error_to_response(&BookmarkError::Validation(ValidationError::InvalidUrl));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Please enter a valid URL");
    assert_eq!(body["code"], "E_INVALID_URL");
}

// =============================================================================
// handlers
// =============================================================================

#[tokio::test]
async fn create_then_list() {
    let (state, _backend, token) = signed_in().await;
    let body = CreateBookmarkBody { title: "Rust".into(), url: "https://www.rust-lang.org".into() };

    let (status, Json(created)) = create(State(state.clone()), auth_for(&state, &token).await, Json(body))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created.domain, "rust-lang.org");

    let Json(rows) = list(State(state.clone()), auth_for(&state, &token).await)
        .await
        .unwrap();
    assert_eq!(rows, vec![created]);
}

#[tokio::test]
async fn create_rejects_blank_title() {
    let (state, _backend, token) = signed_in().await;
    let body = CreateBookmarkBody { title: "  ".into(), url: "https://a.b".into() };
    let (status, Json(err)) = create(State(state.clone()), auth_for(&state, &token).await, Json(body))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "Please fill in all fields");
}

#[tokio::test]
async fn delete_unknown_is_404() {
    let (state, _backend, token) = signed_in().await;
    let (status, _) = delete(State(state.clone()), auth_for(&state, &token).await, Path(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_existing_is_204() {
    let (state, _backend, token) = signed_in().await;
    let body = CreateBookmarkBody { title: "Rust".into(), url: "https://rust-lang.org".into() };
    let (_, Json(created)) = create(State(state.clone()), auth_for(&state, &token).await, Json(body))
        .await
        .unwrap();

    let status = delete(State(state.clone()), auth_for(&state, &token).await, Path(created.id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
}
