use super::*;
use crate::state::test_helpers;
use std::sync::Arc;
use time::OffsetDateTime;

async fn client_count(state: &AppState, user_id: Uuid) -> usize {
    state.feeds.read().await.get(&user_id).map_or(0, |feed| feed.clients.len())
}

fn insert_event(user_id: Uuid) -> ChangeEvent {
    ChangeEvent::Insert(test_helpers::bookmark_for(user_id, "Docs", OffsetDateTime::now_utc()))
}

#[tokio::test]
async fn join_and_part_track_clients() {
    let (state, _backend) = test_helpers::test_app_state();
    let user_id = Uuid::new_v4();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx_a, _rx_a) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
    let (tx_b, _rx_b) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);

    join_feed(&state, user_id, a, tx_a).await;
    join_feed(&state, user_id, b, tx_b).await;
    assert_eq!(client_count(&state, user_id).await, 2);

    part_feed(&state, user_id, a).await;
    assert_eq!(client_count(&state, user_id).await, 1);

    part_feed(&state, user_id, b).await;
    assert_eq!(client_count(&state, user_id).await, 0);
    assert!(state.feeds.read().await.get(&user_id).is_none());
}

#[tokio::test]
async fn realtime_disabled_starts_no_upstream() {
    let (state, _backend) = test_helpers::test_app_state();
    let user_id = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
    join_feed(&state, user_id, Uuid::new_v4(), tx).await;

    let feeds = state.feeds.read().await;
    assert!(feeds.get(&user_id).unwrap().upstream.is_none());
}

fn realtime_state() -> (AppState, Arc<test_helpers::MockBackend>) {
    let backend = Arc::new(test_helpers::MockBackend::new(test_helpers::test_user()));
    let mut config = test_helpers::test_config();
    // Nothing listens here, so a live upstream keeps retrying.
    config.supabase.url = "http://127.0.0.1:9".into();
    config.supabase.realtime_enabled = true;
    (AppState::new(config, backend.clone(), backend.clone()), backend)
}

async fn upstream_finished(state: &AppState, user_id: Uuid) -> Option<bool> {
    let feeds = state.feeds.read().await;
    feeds.get(&user_id)?.upstream.as_ref().map(JoinHandle::is_finished)
}

#[tokio::test]
async fn upstream_without_session_stops() {
    let (state, backend) = realtime_state();
    let user_id = backend.user.id;
    let (tx, _rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
    join_feed(&state, user_id, Uuid::new_v4(), tx).await;

    let stopped = tokio::time::timeout(Duration::from_secs(2), async {
        while upstream_finished(&state, user_id).await != Some(true) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(stopped.is_ok(), "upstream should stop when the user has no session");
}

#[tokio::test]
async fn join_after_sign_in_restarts_finished_upstream() {
    let (state, backend) = realtime_state();
    let user_id = backend.user.id;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx_a, _rx_a) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
    join_feed(&state, user_id, a, tx_a).await;

    tokio::time::timeout(Duration::from_secs(2), async {
        while upstream_finished(&state, user_id).await != Some(true) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("upstream should stop without a session");

    test_helpers::seed_session(&state, &backend).await;
    let (tx_b, _rx_b) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
    join_feed(&state, user_id, b, tx_b).await;

    // The new upstream fails to connect and sits in its backoff sleep.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(upstream_finished(&state, user_id).await, Some(false));

    part_feed(&state, user_id, a).await;
    part_feed(&state, user_id, b).await;
    assert!(state.feeds.read().await.get(&user_id).is_none());
}

#[tokio::test]
async fn part_unknown_user_is_noop() {
    let (state, _backend) = test_helpers::test_app_state();
    part_feed(&state, Uuid::new_v4(), Uuid::new_v4()).await;
    assert!(state.feeds.read().await.is_empty());
}

#[tokio::test]
async fn publish_fans_out_excluding_origin() {
    let (state, _backend) = test_helpers::test_app_state();
    let user_id = Uuid::new_v4();
    let (origin, other) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx_origin, mut rx_origin) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
    let (tx_other, mut rx_other) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
    join_feed(&state, user_id, origin, tx_origin).await;
    join_feed(&state, user_id, other, tx_other).await;

    let event = insert_event(user_id);
    assert_eq!(publish(&state, user_id, &event, Some(origin)).await, 1);

    assert_eq!(rx_other.try_recv().unwrap(), event);
    assert!(rx_origin.try_recv().is_err());
}

#[tokio::test]
async fn publish_does_not_cross_users() {
    let (state, _backend) = test_helpers::test_app_state();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx_bob, mut rx_bob) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
    join_feed(&state, bob, Uuid::new_v4(), tx_bob).await;

    assert_eq!(publish(&state, alice, &insert_event(alice), None).await, 0);
    assert!(rx_bob.try_recv().is_err());
}

#[tokio::test]
async fn publish_skips_full_channels() {
    let (state, _backend) = test_helpers::test_app_state();
    let user_id = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(1);
    join_feed(&state, user_id, Uuid::new_v4(), tx).await;

    assert_eq!(publish(&state, user_id, &insert_event(user_id), None).await, 1);
    assert_eq!(publish(&state, user_id, &insert_event(user_id), None).await, 0);
}

#[test]
fn backoff_doubles_and_caps() {
    assert_eq!(next_backoff(Duration::from_secs(1)), Duration::from_secs(2));
    assert_eq!(next_backoff(Duration::from_secs(16)), Duration::from_secs(30));
    assert_eq!(next_backoff(Duration::from_secs(30)), Duration::from_secs(30));
}
