//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router serves the server-rendered pages, the sign-in flow, the
//! JSON bookmark API, and the live websocket. Static assets for the pages
//! are served from `STATIC_DIR` under `/static`.

pub mod auth;
pub mod bookmarks;
pub mod pages;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let static_dir = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/", get(pages::landing))
        .route("/bookmarks", get(pages::bookmarks))
        .route("/auth/signin", get(auth::signin))
        .route("/auth/callback", get(auth::callback))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/ws-ticket", post(auth::ws_ticket))
        .route("/api/bookmarks", get(bookmarks::list).post(bookmarks::create))
        .route("/api/bookmarks/{id}", delete(bookmarks::delete))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .nest_service("/static", static_dir)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
