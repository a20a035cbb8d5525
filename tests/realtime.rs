use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use clinic_comms_service::websocket::events::ServerEvent;
use clinic_comms_service::websocket::{PresenceTracker, Room, SessionRegistry, TypingTracker};
use uuid::Uuid;

#[tokio::test]
async fn room_broadcast_reaches_every_member_connection() {
    let registry = SessionRegistry::new();
    let conversation = Uuid::new_v4();
    let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());
    let (conn_a, conn_b, conn_outside) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let mut rx_a = registry.register(conn_a, user_a).await;
    let mut rx_b = registry.register(conn_b, user_b).await;
    let mut rx_outside = registry.register(conn_outside, Uuid::new_v4()).await;

    registry.join(conn_a, Room::Conversation(conversation)).await;
    registry.join(conn_b, Room::Conversation(conversation)).await;

    registry
        .broadcast(
            Room::Conversation(conversation),
            Message::Text("hello".into()),
        )
        .await;

    assert!(matches!(rx_a.try_recv(), Ok(Message::Text(t)) if t == "hello"));
    assert!(matches!(rx_b.try_recv(), Ok(Message::Text(t)) if t == "hello"));
    assert!(rx_outside.try_recv().is_err());
}

#[tokio::test]
async fn broadcast_except_skips_the_actor_but_not_others() {
    let registry = SessionRegistry::new();
    let conversation = Uuid::new_v4();
    let (actor, other) = (Uuid::new_v4(), Uuid::new_v4());
    let (conn_actor, conn_other) = (Uuid::new_v4(), Uuid::new_v4());

    let mut rx_actor = registry.register(conn_actor, actor).await;
    let mut rx_other = registry.register(conn_other, other).await;
    registry.join(conn_actor, Room::Conversation(conversation)).await;
    registry.join(conn_other, Room::Conversation(conversation)).await;

    registry
        .broadcast_except(
            Room::Conversation(conversation),
            actor,
            Message::Text("typing".into()),
        )
        .await;

    assert!(rx_actor.try_recv().is_err());
    assert!(rx_other.try_recv().is_ok());
}

#[tokio::test]
async fn presence_transitions_fire_only_at_the_edges() {
    let presence = PresenceTracker::new();
    let user = Uuid::new_v4();
    let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

    assert!(presence.connection_opened(user, first).await);
    assert!(!presence.connection_opened(user, second).await);
    assert!(presence.is_online(user).await);

    assert!(!presence.connection_closed(user, first).await);
    assert!(presence.is_online(user).await);
    assert!(presence.connection_closed(user, second).await);
    assert!(!presence.is_online(user).await);
}

#[tokio::test(start_paused = true)]
async fn typing_restart_extends_the_episode_without_expiring() {
    let typing = TypingTracker::new(Duration::from_secs(5));
    let expirations = Arc::new(AtomicUsize::new(0));
    let (conn, conversation) = (Uuid::new_v4(), Uuid::new_v4());

    let counter = Arc::clone(&expirations);
    assert!(
        typing
            .start(conn, conversation, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
    );

    tokio::time::sleep(Duration::from_secs(3)).await;
    let counter = Arc::clone(&expirations);
    // restart inside the window: same episode, timer re-armed
    assert!(
        !typing
            .start(conn, conversation, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
    );

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(typing.is_typing(conn, conversation).await);
    assert_eq!(expirations.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!typing.is_typing(conn, conversation).await);
    assert_eq!(expirations.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_stop_suppresses_the_expiry_callback() {
    let typing = TypingTracker::new(Duration::from_secs(5));
    let expirations = Arc::new(AtomicUsize::new(0));
    let (conn, conversation) = (Uuid::new_v4(), Uuid::new_v4());

    let counter = Arc::clone(&expirations);
    typing
        .start(conn, conversation, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    assert!(typing.stop(conn, conversation).await);
    // second stop is a no-op
    assert!(!typing.stop(conn, conversation).await);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(expirations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disconnect_reports_conversations_with_live_typing() {
    let typing = TypingTracker::new(Duration::from_secs(60));
    let conn = Uuid::new_v4();
    let (conv_a, conv_b) = (Uuid::new_v4(), Uuid::new_v4());

    typing.start(conn, conv_a, || async {}).await;
    typing.start(conn, conv_b, || async {}).await;
    typing.stop(conn, conv_b).await;

    let open = typing.disconnect(conn).await;
    assert_eq!(open, vec![conv_a]);
}

#[test]
fn server_events_carry_the_actor_and_timestamp() {
    let conversation_id = Uuid::new_v4();
    let actor = Uuid::new_v4();
    let payload = ServerEvent::TypingStarted { conversation_id }
        .to_broadcast_payload(actor)
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(value["type"], "typing.started");
    assert_eq!(value["user_id"], actor.to_string());
    assert!(value["timestamp"].is_string());
}
