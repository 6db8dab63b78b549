//! Bookmark service — validation, CRUD through the table API, and display
//! helpers.
//!
//! DESIGN
//! ======
//! Every call runs with the caller's access token, so ownership is enforced
//! by the backend's row-level security rather than by this server. Successful
//! mutations publish a change to the user's live feed; the connection that
//! made the change is excluded because it already has the result.

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::info;
use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::services::feed;
use crate::state::{AppState, Bookmark, NewBookmark};
use crate::supabase::SupabaseError;
use crate::supabase::realtime::ChangeEvent;

// =============================================================================
// ERRORS
// =============================================================================

/// Form input problems. The display text is shown to the user as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please fill in all fields")]
    MissingFields,
    #[error("Please enter a valid URL")]
    InvalidUrl,
}

#[derive(Debug, thiserror::Error)]
pub enum BookmarkError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("bookmark not found: {0}")]
    NotFound(Uuid),
    #[error("bookmark storage failed: {0}")]
    Backend(#[from] SupabaseError),
}

impl ErrorCode for BookmarkError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::MissingFields) => "E_MISSING_FIELDS",
            Self::Validation(ValidationError::InvalidUrl) => "E_INVALID_URL",
            Self::NotFound(_) => "E_BOOKMARK_NOT_FOUND",
            Self::Backend(_) => "E_BACKEND",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.retryable(),
            _ => false,
        }
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Trim and check form input. Returns the trimmed `(title, url)`.
///
/// # Errors
///
/// `MissingFields` if either value is blank, `InvalidUrl` if the URL is not
/// an absolute URL.
pub fn validate(title: &str, url: &str) -> Result<(String, String), ValidationError> {
    let title = title.trim();
    let url = url.trim();
    if title.is_empty() || url.is_empty() {
        return Err(ValidationError::MissingFields);
    }
    url::Url::parse(url).map_err(|_| ValidationError::InvalidUrl)?;
    Ok((title.to_owned(), url.to_owned()))
}

// =============================================================================
// CRUD
// =============================================================================

/// All bookmarks of `user_id`, newest first.
///
/// # Errors
///
/// Returns `Backend` if the table API fails.
pub async fn list(state: &AppState, access_token: &str, user_id: Uuid) -> Result<Vec<Bookmark>, BookmarkError> {
    Ok(state.tables.list_bookmarks(access_token, user_id).await?)
}

/// Validate and store a new bookmark, then publish it to the user's other
/// connections.
///
/// # Errors
///
/// Returns `Validation` for bad input or `Backend` if the insert fails.
pub async fn create(
    state: &AppState,
    access_token: &str,
    user_id: Uuid,
    title: &str,
    url: &str,
    origin: Option<Uuid>,
) -> Result<Bookmark, BookmarkError> {
    let (title, url) = validate(title, url)?;
    let row = state
        .tables
        .insert_bookmark(access_token, &NewBookmark { title, url, user_id })
        .await?;

    info!(%user_id, bookmark_id = %row.id, "bookmark created");
    feed::publish(state, user_id, &ChangeEvent::Insert(row.clone()), origin).await;
    Ok(row)
}

/// Delete a bookmark by id, then publish the removal.
///
/// # Errors
///
/// Returns `NotFound` if no row was removed (unknown id or not owned by the
/// caller) or `Backend` if the delete fails.
pub async fn delete(
    state: &AppState,
    access_token: &str,
    user_id: Uuid,
    id: Uuid,
    origin: Option<Uuid>,
) -> Result<(), BookmarkError> {
    if !state.tables.delete_bookmark(access_token, id).await? {
        return Err(BookmarkError::NotFound(id));
    }

    info!(%user_id, bookmark_id = %id, "bookmark deleted");
    feed::publish(state, user_id, &ChangeEvent::Delete(id), origin).await;
    Ok(())
}

// =============================================================================
// DISPLAY
// =============================================================================

/// Host of `url` without its first `www.`. `Invalid URL` if it does not
/// parse.
#[must_use]
pub fn display_domain(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed
            .host_str()
            .unwrap_or_default()
            .replacen("www.", "", 1),
        Err(_) => "Invalid URL".to_owned(),
    }
}

/// `Oct 16, 2026, 03:04 PM`, in UTC.
#[must_use]
pub fn format_created_at(created_at: OffsetDateTime) -> String {
    let format = format_description!("[month repr:short] [day padding:none], [year], [hour repr:12]:[minute] [period]");
    created_at
        .to_offset(time::UtcOffset::UTC)
        .format(format)
        .unwrap_or_else(|_| created_at.to_string())
}

/// A bookmark as rendered on the page and sent to the browser.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BookmarkView {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub domain: String,
    pub created_at: String,
    pub created_label: String,
}

impl From<&Bookmark> for BookmarkView {
    fn from(b: &Bookmark) -> Self {
        Self {
            id: b.id,
            title: b.title.clone(),
            url: b.url.clone(),
            domain: display_domain(&b.url),
            created_at: b
                .created_at
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            created_label: format_created_at(b.created_at),
        }
    }
}

#[cfg(test)]
#[path = "bookmark_test.rs"]
mod tests;
