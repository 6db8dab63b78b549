//! Bookmark REST routes — JSON list/create/delete for the signed-in user.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::routes::auth::AuthUser;
use crate::services::bookmark::{self, BookmarkError, BookmarkView};
use crate::state::AppState;

type ApiError = (StatusCode, Json<serde_json::Value>);

#[derive(Debug, Deserialize)]
pub struct CreateBookmarkBody {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

pub(crate) fn bookmark_error_to_status(err: &BookmarkError) -> StatusCode {
    match err {
        BookmarkError::Validation(_) => StatusCode::BAD_REQUEST,
        BookmarkError::NotFound(_) => StatusCode::NOT_FOUND,
        BookmarkError::Backend(e) => match e.status() {
            Some(401 | 403) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_GATEWAY,
        },
    }
}

/// JSON error body: `{ "error": message, "code": code }`.
fn bookmark_error_to_response(err: &BookmarkError) -> ApiError {
    let status = bookmark_error_to_status(err);
    if status.is_server_error() {
        warn!(error = %err, "bookmark request failed");
    }
    let message = match err {
        BookmarkError::Validation(v) => v.to_string(),
        BookmarkError::NotFound(_) => "Bookmark not found".to_owned(),
        BookmarkError::Backend(_) => "Bookmark storage is unavailable".to_owned(),
    };
    (status, Json(serde_json::json!({ "error": message, "code": err.error_code() })))
}

/// `GET /api/bookmarks` — the caller's bookmarks, newest first.
pub async fn list(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<BookmarkView>>, ApiError> {
    let rows = bookmark::list(&state, &auth.access_token, auth.user.id)
        .await
        .map_err(|e| bookmark_error_to_response(&e))?;
    Ok(Json(rows.iter().map(BookmarkView::from).collect()))
}

/// `POST /api/bookmarks` — validate and store a bookmark.
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateBookmarkBody>,
) -> Result<(StatusCode, Json<BookmarkView>), ApiError> {
    let row = bookmark::create(&state, &auth.access_token, auth.user.id, &body.title, &body.url, None)
        .await
        .map_err(|e| bookmark_error_to_response(&e))?;
    Ok((StatusCode::CREATED, Json(BookmarkView::from(&row))))
}

/// `DELETE /api/bookmarks/{id}` — delete one of the caller's bookmarks.
pub async fn delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    bookmark::delete(&state, &auth.access_token, auth.user.id, id, None)
        .await
        .map_err(|e| bookmark_error_to_response(&e))?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "bookmarks_test.rs"]
mod tests;
