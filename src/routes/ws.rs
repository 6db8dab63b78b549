//! WebSocket handler — bookmark requests and live change pushes.
//!
//! DESIGN
//! ======
//! On upgrade, the connection joins its user's feed and enters a `select!`
//! loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Change events from the feed → reconcile with this connection's list →
//!   push to the client only if the list changed
//!
//! Each connection keeps its own `BookmarkList` so the provider's echo of a
//! change this connection already saw is dropped instead of shown twice.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. Client sends `bookmark:list` to (re)sync, then create/delete requests
//! 3. Feed events become `bookmark:inserted` / `updated` / `deleted` pushes
//! 4. A feed event after sign-out sends `session:expired` and closes
//! 5. Close → part the feed

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, FRAME_CODE, Frame, Status};
use crate::services;
use crate::services::bookmark::BookmarkView;
use crate::services::feed::CLIENT_CHANNEL_CAPACITY;
use crate::services::list::BookmarkList;
use crate::state::AppState;
use crate::supabase::realtime::ChangeEvent;

/// Per-connection state.
pub(crate) struct Connection {
    pub client_id: Uuid,
    pub user_id: Uuid,
    /// Local session backing this socket; resolved to a fresh provider
    /// token on every request.
    pub session_token: String,
    pub list: BookmarkList,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(ticket) = params.get("ticket") else {
        return (StatusCode::UNAUTHORIZED, "ticket required").into_response();
    };

    let Some(session_token) = services::session::consume_ws_ticket(&state, ticket).await else {
        return (StatusCode::UNAUTHORIZED, "invalid or expired ticket").into_response();
    };

    let user_id = match services::session::validate_session(&state, &session_token).await {
        Ok(Some(active)) => active.user.id,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "session expired").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "ws session validation failed");
            return (StatusCode::BAD_GATEWAY, "session validation error").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, user_id, session_token))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: Uuid, session_token: String) {
    let mut conn = Connection { client_id: Uuid::new_v4(), user_id, session_token, list: BookmarkList::new() };
    let client_id = conn.client_id;

    let (client_tx, mut client_rx) = mpsc::channel::<ChangeEvent>(CLIENT_CHANNEL_CAPACITY);

    let welcome = Frame::request("session:connected", Data::new())
        .with_user_id(user_id)
        .with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    services::feed::join_feed(&state, user_id, client_id, client_tx).await;
    info!(%client_id, %user_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, &mut conn, &text).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = client_rx.recv() => {
                match process_feed_event(&state, &mut conn, &event).await {
                    Ok(Some(frame)) => {
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(last) => {
                        let _ = send_frame(&mut socket, &last).await;
                        break;
                    }
                }
            }
        }
    }

    services::feed::part_feed(&state, user_id, client_id).await;
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
pub(crate) async fn process_inbound_text(state: &AppState, conn: &mut Connection, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(client_id = %conn.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the authenticated user.
    req.user_id = Some(conn.user_id);
    info!(client_id = %conn.client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "bookmark" => handle_bookmark(state, conn, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(data) => vec![req.done_with(data)],
        Err(err_frame) => vec![err_frame],
    }
}

/// Fresh provider token for the connection's session.
async fn access_token(state: &AppState, conn: &Connection, req: &Frame) -> Result<String, Frame> {
    match services::session::validate_session(state, &conn.session_token).await {
        Ok(Some(active)) => Ok(active.access_token),
        Ok(None) => Err(req
            .error("session expired")
            .with_data(FRAME_CODE, "E_SESSION_EXPIRED")),
        Err(e) => Err(req.error_from(&e)),
    }
}

async fn handle_bookmark(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Data, Frame> {
    match req.op() {
        "list" => {
            let token = access_token(state, conn, req).await?;
            let rows = services::bookmark::list(state, &token, conn.user_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            conn.list.replace_all(rows);

            let views: Vec<BookmarkView> = conn.list.items().iter().map(BookmarkView::from).collect();
            let mut data = Data::new();
            data.insert("bookmarks".into(), serde_json::to_value(views).unwrap_or_default());
            Ok(data)
        }
        "create" => {
            let title = req.data.get("title").and_then(|v| v.as_str()).unwrap_or_default();
            let url = req.data.get("url").and_then(|v| v.as_str()).unwrap_or_default();
            let token = access_token(state, conn, req).await?;
            let row = services::bookmark::create(state, &token, conn.user_id, title, url, Some(conn.client_id))
                .await
                .map_err(|e| req.error_from(&e))?;
            conn.list.apply(&ChangeEvent::Insert(row.clone()));

            let mut data = Data::new();
            data.insert("bookmark".into(), serde_json::to_value(BookmarkView::from(&row)).unwrap_or_default());
            Ok(data)
        }
        "delete" => {
            let Some(id) = req
                .data
                .get("id")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Uuid>().ok())
            else {
                return Err(req.error("id required"));
            };
            let token = access_token(state, conn, req).await?;
            services::bookmark::delete(state, &token, conn.user_id, id, Some(conn.client_id))
                .await
                .map_err(|e| req.error_from(&e))?;
            conn.list.apply(&ChangeEvent::Delete(id));

            let mut data = Data::new();
            data.insert("id".into(), serde_json::json!(id));
            Ok(data)
        }
        op => Err(req.error(format!("unknown bookmark op: {op}"))),
    }
}

// =============================================================================
// PUSH
// =============================================================================

/// Reconcile a feed event with the connection's list. Returns the push frame
/// if the list changed.
/// Gate a feed event on the socket's session. `Err` carries a final
/// `session:expired` push; the socket closes after sending it.
pub(crate) async fn process_feed_event(
    state: &AppState,
    conn: &mut Connection,
    event: &ChangeEvent,
) -> Result<Option<Frame>, Frame> {
    if !services::session::is_live(state, &conn.session_token).await {
        info!(client_id = %conn.client_id, "ws: session ended, closing");
        return Err(Frame::request("session:expired", Data::new())
            .with_user_id(conn.user_id)
            .with_data(FRAME_CODE, "E_SESSION_EXPIRED"));
    }
    Ok(process_change(conn, event))
}

pub(crate) fn process_change(conn: &mut Connection, event: &ChangeEvent) -> Option<Frame> {
    if !conn.list.apply(event) {
        return None;
    }
    let frame = match event {
        ChangeEvent::Insert(b) => Frame::request("bookmark:inserted", Data::new())
            .with_data("bookmark", serde_json::to_value(BookmarkView::from(b)).unwrap_or_default()),
        ChangeEvent::Update(b) => Frame::request("bookmark:updated", Data::new())
            .with_data("bookmark", serde_json::to_value(BookmarkView::from(b)).unwrap_or_default()),
        ChangeEvent::Delete(id) => Frame::request("bookmark:deleted", Data::new()).with_data("id", id.to_string()),
    };
    Some(frame.with_user_id(conn.user_id))
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame
            .data
            .get(FRAME_CODE)
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
