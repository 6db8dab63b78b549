use super::*;
use std::future::Future;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;

const USER: &str = "0b3c6f5e-8a7d-4c2b-9e1f-2d3c4b5a6978";
const BOOKMARK: &str = "5f1d7c2a-3b4e-4f6a-8c9d-0e1f2a3b4c5d";

fn user_id() -> Uuid {
    USER.parse().unwrap()
}

fn change(kind: &str, data: serde_json::Value) -> PhoenixMessage {
    let mut data = data;
    data["type"] = serde_json::json!(kind);
    PhoenixMessage {
        topic: topic_for(user_id()),
        event: "postgres_changes".into(),
        payload: serde_json::json!({ "data": data, "ids": [1234] }),
        reference: None,
    }
}

fn record() -> serde_json::Value {
    serde_json::json!({
        "id": BOOKMARK,
        "title": "Rust",
        "url": "https://www.rust-lang.org",
        "user_id": USER,
        "created_at": "2026-10-16T15:04:05.123+00:00"
    })
}

// =============================================================================
// socket_url
// =============================================================================

#[test]
fn socket_url_switches_to_wss() {
    let url = socket_url("https://abc.supabase.co", "anon").unwrap();
    assert_eq!(url, "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0");
}

#[test]
fn socket_url_local_http_becomes_ws() {
    let url = socket_url("http://127.0.0.1:54321", "k").unwrap();
    assert!(url.starts_with("ws://127.0.0.1:54321/realtime/v1/websocket?"));
}

#[test]
fn socket_url_rejects_other_schemes() {
    assert!(socket_url("ftp://example.com", "k").is_err());
    assert!(socket_url("not a url", "k").is_err());
}

// =============================================================================
// outbound messages
// =============================================================================

#[test]
fn join_message_filters_on_user() {
    let msg = join_message(user_id(), "at-1", "1");
    assert_eq!(msg.topic, format!("realtime:bookmarks:{USER}"));
    assert_eq!(msg.event, "phx_join");
    assert_eq!(msg.reference.as_deref(), Some("1"));
    let binding = &msg.payload["config"]["postgres_changes"][0];
    assert_eq!(binding["event"], "*");
    assert_eq!(binding["table"], "bookmarks");
    assert_eq!(binding["filter"], format!("user_id=eq.{USER}"));
    assert_eq!(msg.payload["access_token"], "at-1");
}

#[test]
fn heartbeat_targets_phoenix_topic() {
    let json = serde_json::to_value(heartbeat_message("7")).unwrap();
    assert_eq!(json["topic"], "phoenix");
    assert_eq!(json["event"], "heartbeat");
    assert_eq!(json["ref"], "7");
}

// =============================================================================
// parse_change
// =============================================================================

#[test]
fn parse_insert() {
    let msg = change("INSERT", serde_json::json!({ "record": record(), "old_record": null }));
    let event = parse_change(&msg).unwrap().unwrap();
    match event {
        ChangeEvent::Insert(b) => {
            assert_eq!(b.title, "Rust");
            assert_eq!(b.user_id, user_id());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn parse_update() {
    let msg = change("UPDATE", serde_json::json!({ "record": record(), "old_record": {"id": BOOKMARK} }));
    assert!(matches!(parse_change(&msg).unwrap(), Some(ChangeEvent::Update(_))));
}

#[test]
fn parse_delete_uses_old_record_id() {
    let msg = change("DELETE", serde_json::json!({ "old_record": {"id": BOOKMARK} }));
    let event = parse_change(&msg).unwrap().unwrap();
    assert_eq!(event, ChangeEvent::Delete(BOOKMARK.parse().unwrap()));
    assert_eq!(event.bookmark_id(), BOOKMARK.parse::<Uuid>().unwrap());
}

#[test]
fn parse_delete_without_id_is_error() {
    let msg = change("DELETE", serde_json::json!({ "old_record": {} }));
    assert!(parse_change(&msg).is_err());
}

#[test]
fn parse_ignores_other_events() {
    let msg = PhoenixMessage {
        topic: "phoenix".into(),
        event: "phx_reply".into(),
        payload: serde_json::json!({"status": "ok", "response": {}}),
        reference: Some("2".into()),
    };
    assert!(parse_change(&msg).unwrap().is_none());
}

#[test]
fn inbound_envelope_deserializes() {
    let raw = format!(
        r#"{{"topic":"realtime:bookmarks:{USER}","event":"postgres_changes","payload":{{"data":{{"type":"DELETE","old_record":{{"id":"{BOOKMARK}"}}}}}},"ref":null}}"#
    );
    let msg: PhoenixMessage = serde_json::from_str(&raw).unwrap();
    assert!(msg.reference.is_none());
    assert!(matches!(parse_change(&msg).unwrap(), Some(ChangeEvent::Delete(_))));
}

// =============================================================================
// channel_failure
// =============================================================================

#[test]
fn join_ok_is_not_a_failure() {
    let topic = topic_for(user_id());
    let msg = PhoenixMessage {
        topic: topic.clone(),
        event: "phx_reply".into(),
        payload: serde_json::json!({"status": "ok", "response": {"postgres_changes": []}}),
        reference: Some("1".into()),
    };
    assert!(channel_failure(&msg, &topic, "1").is_none());
}

#[test]
fn join_error_is_a_failure() {
    let topic = topic_for(user_id());
    let msg = PhoenixMessage {
        topic: topic.clone(),
        event: "phx_reply".into(),
        payload: serde_json::json!({"status": "error", "response": {"reason": "Invalid JWT"}}),
        reference: Some("1".into()),
    };
    let reason = channel_failure(&msg, &topic, "1").unwrap();
    assert!(reason.contains("Invalid JWT"));
}

#[test]
fn heartbeat_reply_on_phoenix_topic_is_ignored() {
    let topic = topic_for(user_id());
    let msg = PhoenixMessage {
        topic: "phoenix".into(),
        event: "phx_reply".into(),
        payload: serde_json::json!({"status": "ok"}),
        reference: Some("1".into()),
    };
    assert!(channel_failure(&msg, &topic, "1").is_none());
}

#[test]
fn server_close_is_a_failure() {
    let topic = topic_for(user_id());
    let msg = PhoenixMessage {
        topic: topic.clone(),
        event: "phx_close".into(),
        payload: serde_json::json!({}),
        reference: None,
    };
    assert!(channel_failure(&msg, &topic, "1").is_some());
}

// =============================================================================
// stream_changes against a local socket
// =============================================================================

type ServerSocket = WebSocketStream<TcpStream>;

/// Accept one websocket connection and hand it to `handler`.
async fn serve_once<F, Fut>(handler: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        handler(socket).await;
    });
    (format!("ws://{addr}/realtime/v1/websocket?apikey=k&vsn=1.0.0"), server)
}

async fn next_message(socket: &mut ServerSocket) -> PhoenixMessage {
    loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            _ => continue,
        }
    }
}

async fn send(socket: &mut ServerSocket, msg: &PhoenixMessage) {
    socket
        .send(Message::Text(serde_json::to_string(msg).unwrap().into()))
        .await
        .unwrap();
}

fn join_reply(join: &PhoenixMessage, status: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: join.topic.clone(),
        event: "phx_reply".into(),
        payload: serde_json::json!({"status": status, "response": {"reason": "Invalid JWT"}}),
        reference: join.reference.clone(),
    }
}

#[tokio::test]
async fn stream_forwards_changes_until_server_closes() {
    let (url, server) = serve_once(|mut socket| async move {
        let join = next_message(&mut socket).await;
        assert_eq!(join.event, "phx_join");
        assert_eq!(join.payload["access_token"], "at-1");
        send(&mut socket, &join_reply(&join, "ok")).await;
        send(&mut socket, &change("INSERT", serde_json::json!({ "record": record() }))).await;
        socket.close(None).await.unwrap();
    })
    .await;

    let (tx, mut rx) = mpsc::channel(8);
    let end = stream_changes(&url, user_id(), "at-1", &tx).await.unwrap();
    assert_eq!(end, StreamEnd::Closed);
    assert!(matches!(rx.try_recv().unwrap(), ChangeEvent::Insert(b) if b.title == "Rust"));
    server.await.unwrap();
}

#[tokio::test]
async fn stream_fails_when_join_is_rejected() {
    let (url, server) = serve_once(|mut socket| async move {
        let join = next_message(&mut socket).await;
        send(&mut socket, &join_reply(&join, "error")).await;
        // Hold the socket until the client hangs up.
        while let Some(Ok(_)) = socket.next().await {}
    })
    .await;

    let (tx, _rx) = mpsc::channel(8);
    let err = stream_changes(&url, user_id(), "expired", &tx).await.unwrap_err();
    assert!(matches!(&err, SupabaseError::Realtime(reason) if reason.contains("Invalid JWT")));
    drop(tx);
    server.await.unwrap();
}

#[tokio::test]
async fn stream_sends_heartbeats_on_phoenix_topic() {
    let (url, server) = serve_once(|mut socket| async move {
        let join = next_message(&mut socket).await;
        send(&mut socket, &join_reply(&join, "ok")).await;
        let beat = next_message(&mut socket).await;
        assert_eq!(beat.topic, "phoenix");
        assert_eq!(beat.event, "heartbeat");
        assert_eq!(beat.reference.as_deref(), Some("2"));
        socket.close(None).await.unwrap();
    })
    .await;

    let (tx, _rx) = mpsc::channel(8);
    // A later heartbeat may race the close, so only the server's view matters.
    let _ = stream_with_heartbeat(&url, user_id(), "at-1", &tx, Duration::from_millis(20)).await;
    server.await.unwrap();
}

#[tokio::test]
async fn stream_stops_when_receiver_is_dropped() {
    let (url, server) = serve_once(|mut socket| async move {
        let join = next_message(&mut socket).await;
        send(&mut socket, &join_reply(&join, "ok")).await;
        while let Some(Ok(_)) = socket.next().await {}
    })
    .await;

    let (tx, rx) = mpsc::channel(8);
    drop(rx);
    let end = stream_changes(&url, user_id(), "at-1", &tx).await.unwrap();
    assert_eq!(end, StreamEnd::ReceiverGone);
    server.await.unwrap();
}

#[tokio::test]
async fn stream_connect_failure_is_realtime_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (tx, _rx) = mpsc::channel(8);
    let err = stream_changes(&format!("ws://{addr}/realtime/v1/websocket"), user_id(), "at-1", &tx)
        .await
        .unwrap_err();
    assert!(matches!(err, SupabaseError::Realtime(_)));
}
