//! Page routes — server-rendered landing, bookmarks, and callback pages.
//!
//! DESIGN
//! ======
//! Pages are plain HTML templates with `{{NAME}}` placeholders filled by
//! string replacement. Every substituted value is HTML-escaped. The bookmarks
//! page renders the initial list; `static/app.js` keeps it live over the
//! websocket afterwards.

use axum::extract::State;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use html_escape::{encode_double_quoted_attribute, encode_text};
use tracing::warn;

use crate::routes::auth::session_from_jar;
use crate::services::bookmark::{self, BookmarkView};
use crate::services::session::SessionUser;
use crate::state::{AppState, Bookmark};

const INDEX_TEMPLATE: &str = include_str!("../../templates/index.html");
const BOOKMARKS_TEMPLATE: &str = include_str!("../../templates/bookmarks.html");
const CALLBACK_TEMPLATE: &str = include_str!("../../templates/callback.html");

const EMPTY_LIST_MESSAGE: &str = "No bookmarks yet. Add one to get started!";

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /` — landing page; signed-in users go straight to their bookmarks.
pub async fn landing(State(state): State<AppState>, jar: CookieJar) -> Response {
    match session_from_jar(&state, &jar).await {
        Ok(Some(_)) => Redirect::temporary("/bookmarks").into_response(),
        Ok(None) => Html(render_landing()).into_response(),
        Err(e) => {
            warn!(error = %e, "landing: session check failed");
            Html(render_landing()).into_response()
        }
    }
}

/// `GET /bookmarks` — the list and form; visitors without a session go home.
pub async fn bookmarks(State(state): State<AppState>, jar: CookieJar) -> Response {
    let auth = match session_from_jar(&state, &jar).await {
        Ok(Some(auth)) => auth,
        Ok(None) => return Redirect::temporary("/").into_response(),
        Err(e) => {
            warn!(error = %e, "bookmarks: session check failed");
            return Redirect::temporary("/").into_response();
        }
    };

    match bookmark::list(&state, &auth.access_token, auth.user.id).await {
        Ok(rows) => Html(render_bookmarks(&auth.user, &rows, None)).into_response(),
        Err(e) => {
            warn!(user_id = %auth.user.id, error = %e, "bookmarks: initial load failed");
            Html(render_bookmarks(&auth.user, &[], Some("Failed to load bookmarks"))).into_response()
        }
    }
}

// =============================================================================
// RENDERING
// =============================================================================

#[must_use]
pub fn render_landing() -> String {
    INDEX_TEMPLATE.to_owned()
}

/// Full bookmarks page for `user`.
#[must_use]
pub fn render_bookmarks(user: &SessionUser, rows: &[Bookmark], load_error: Option<&str>) -> String {
    let items: String = rows
        .iter()
        .map(|b| render_bookmark_item(&BookmarkView::from(b)))
        .collect();
    let empty_hidden = if rows.is_empty() { "" } else { " hidden" };
    let error_html = load_error.map_or_else(String::new, |msg| {
        format!(r#"<div class="alert alert-error">{}</div>"#, encode_text(msg))
    });

    BOOKMARKS_TEMPLATE
        .replace("{{USER_ID}}", &encode_double_quoted_attribute(&user.id.to_string()))
        .replace("{{USER_EMAIL}}", &encode_text(user.email.as_deref().unwrap_or_default()))
        .replace("{{USER_NAME}}", &encode_double_quoted_attribute(&user.name))
        .replace("{{COUNT}}", &rows.len().to_string())
        .replace("{{EMPTY_HIDDEN}}", empty_hidden)
        .replace("{{EMPTY_MESSAGE}}", EMPTY_LIST_MESSAGE)
        .replace("{{LOAD_ERROR}}", &error_html)
        .replace("{{ITEMS}}", &items)
}

/// One list entry. Mirrors `renderItem` in `static/app.js`.
#[must_use]
pub fn render_bookmark_item(view: &BookmarkView) -> String {
    let id = view.id.to_string();
    format!(
        concat!(
            r#"<li class="bookmark" data-id="{id}">"#,
            r#"<div class="bookmark-body">"#,
            r#"<h3 class="bookmark-title">{title}</h3>"#,
            r#"<a class="bookmark-link" href="{href}" target="_blank" rel="noopener noreferrer" title="{href}">{domain}</a>"#,
            r#"<p class="bookmark-date"><time datetime="{created_at}">{created_label}</time></p>"#,
            r#"</div>"#,
            r#"<button type="button" class="bookmark-delete" data-id="{id}" title="Delete bookmark">Delete</button>"#,
            r#"</li>"#,
        ),
        id = encode_double_quoted_attribute(&id),
        title = encode_text(&view.title),
        href = encode_double_quoted_attribute(&view.url),
        domain = encode_text(&view.domain),
        created_at = encode_double_quoted_attribute(&view.created_at),
        created_label = encode_text(&view.created_label),
    )
}

/// Callback failure page: shows `message`, then returns home after
/// `redirect_secs`.
#[must_use]
pub fn render_callback_error(message: &str, redirect_secs: u64) -> Html<String> {
    Html(
        CALLBACK_TEMPLATE
            .replace("{{REDIRECT_SECS}}", &redirect_secs.to_string())
            .replace("{{MESSAGE}}", &encode_text(message)),
    )
}

#[cfg(test)]
#[path = "pages_test.rs"]
mod tests;
