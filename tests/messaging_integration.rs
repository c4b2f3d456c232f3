//! Integration tests for the messaging core.
//!
//! Two full client sessions share one in-memory backend; every durable
//! write is echoed back over both change feeds, so these tests cover the
//! whole path: operation, backend write, feed echo, reducer merge, UI
//! event.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use baraholka_client::api;
use baraholka_client::backend::{BlobStore, DataBackend, Filter};
use baraholka_client::services::types::{DeliveryState, NotificationKind};
use baraholka_client::services::ConfigService;
use baraholka_client::{start_session, AppState, BaraholkaError, SessionUser, UiEvent};

use common::InMemoryBackend;

const WAIT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(100);

fn test_config() -> ConfigService {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    // Short typing TTL so expiry is observable within a test run.
    std::fs::write(&path, "[chat]\ntyping_ttl_secs = 1\n").unwrap();
    ConfigService::from_path(path)
}

async fn client(backend: &Arc<InMemoryBackend>, id: &str, name: &str) -> AppState {
    let data: Arc<dyn DataBackend> = backend.clone();
    let blob: Arc<dyn BlobStore> = backend.clone();
    let session = SessionUser {
        id: id.to_string(),
        display_name: name.to_string(),
    };
    let state = AppState::new(test_config(), data, blob, session);
    start_session(&state).await.unwrap();
    state
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<UiEvent>) -> UiEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event bus closed")
}

/// Wait until the other client's chat list shows the thread.
async fn wait_for_chat(state: &AppState, chat_id: &str) {
    for _ in 0..50 {
        if api::get_chats(state)
            .await
            .unwrap()
            .iter()
            .any(|c| c.id == chat_id)
        {
            return;
        }
        sleep(POLL).await;
    }
    panic!("chat {} never arrived", chat_id);
}

#[tokio::test]
async fn test_start_chat_is_one_thread_for_both_clients() {
    let backend = Arc::new(InMemoryBackend::new());
    let alice = client(&backend, "u1", "Иван Петров").await;
    let bob = client(&backend, "u2", "Мария Сидорова").await;

    // Alice opens the thread twice; the second call reuses the row.
    let chat = api::start_chat(&alice, "u2".to_string(), Some("l1".to_string()))
        .await
        .unwrap();
    let again = api::start_chat(&alice, "u2".to_string(), Some("l1".to_string()))
        .await
        .unwrap();
    assert_eq!(chat.id, again.id);

    // Bob sees the same thread over the feed and reuses it too.
    wait_for_chat(&bob, &chat.id).await;
    let reused = api::start_chat(&bob, "u1".to_string(), Some("l1".to_string()))
        .await
        .unwrap();
    assert_eq!(reused.id, chat.id);

    // A different listing is a different thread.
    let other = api::start_chat(&alice, "u2".to_string(), Some("l2".to_string()))
        .await
        .unwrap();
    assert_ne!(other.id, chat.id);
}

#[tokio::test]
async fn test_message_delivery_and_read_receipt() {
    let backend = Arc::new(InMemoryBackend::new());
    let alice = client(&backend, "u1", "Иван Петров").await;
    let bob = client(&backend, "u2", "Мария Сидорова").await;

    let chat = api::start_chat(&alice, "u2".to_string(), None).await.unwrap();
    wait_for_chat(&bob, &chat.id).await;
    let mut bob_rx = bob.events.subscribe();

    // Alice sends
    let sent = api::send_chat_message(&alice, chat.id.clone(), "Привет!".to_string(), None)
        .await
        .unwrap();
    assert_eq!(sent.sender_id, "u1");
    assert_eq!(sent.content, "Привет!");
    assert_eq!(sent.read_by, vec!["u1".to_string()]);
    assert_eq!(sent.delivery_state(), DeliveryState::Delivered);

    // Bob receives it over the feed
    loop {
        match next_event(&mut bob_rx).await {
            UiEvent::MessageReceived { chat_id, message } => {
                assert_eq!(chat_id, chat.id);
                assert_eq!(message.id, sent.id);
                assert_eq!(message.content, "Привет!");
                break;
            }
            _ => continue,
        }
    }
    assert_eq!(api::get_unread_count(&bob).await.unwrap(), 1);
    assert_eq!(api::get_unread_count(&alice).await.unwrap(), 0);

    // Bob reads the thread
    let marked = api::mark_chat_read(&bob, chat.id.clone()).await.unwrap();
    assert_eq!(marked, 1);
    assert_eq!(api::get_unread_count(&bob).await.unwrap(), 0);

    // Alice's copy of her own message flips to read
    for _ in 0..50 {
        let state = {
            let store = alice.store.read().await;
            store.message(&sent.id).map(|m| m.delivery_state())
        };
        if state == Some(DeliveryState::Read) {
            return;
        }
        sleep(POLL).await;
    }
    panic!("read receipt never reached the sender");
}

#[tokio::test]
async fn test_send_echo_is_not_duplicated() {
    let backend = Arc::new(InMemoryBackend::new());
    let alice = client(&backend, "u1", "Иван Петров").await;
    let bob = client(&backend, "u2", "Мария Сидорова").await;

    let chat = api::start_chat(&alice, "u2".to_string(), None).await.unwrap();
    wait_for_chat(&bob, &chat.id).await;

    let sent = api::send_chat_message(&alice, chat.id.clone(), "привет".to_string(), None)
        .await
        .unwrap();

    // Bob sees exactly one copy.
    for _ in 0..50 {
        let bob_messages = bob.store.read().await.messages(&chat.id);
        if !bob_messages.is_empty() {
            break;
        }
        sleep(POLL).await;
    }
    // Give the echo time to loop back to the sender as well.
    sleep(Duration::from_millis(300)).await;

    let alice_messages = alice.store.read().await.messages(&chat.id);
    let bob_messages = bob.store.read().await.messages(&chat.id);
    assert_eq!(alice_messages.len(), 1);
    assert_eq!(bob_messages.len(), 1);
    assert_eq!(alice_messages[0].id, sent.id);
    assert_eq!(bob_messages[0].id, sent.id);
}

#[tokio::test]
async fn test_edit_and_delete_propagate() {
    let backend = Arc::new(InMemoryBackend::new());
    let alice = client(&backend, "u1", "Иван Петров").await;
    let bob = client(&backend, "u2", "Мария Сидорова").await;

    let chat = api::start_chat(&alice, "u2".to_string(), None).await.unwrap();
    wait_for_chat(&bob, &chat.id).await;

    let first = api::send_chat_message(&alice, chat.id.clone(), "первое".to_string(), None)
        .await
        .unwrap();
    let second = api::send_chat_message(&alice, chat.id.clone(), "второе".to_string(), None)
        .await
        .unwrap();

    // Edit the first, delete the second
    let edited = api::edit_chat_message(&alice, first.id.clone(), "первое, изменено".to_string())
        .await
        .unwrap();
    assert!(edited.is_edited);
    api::delete_chat_message(&alice, second.id.clone())
        .await
        .unwrap();

    // Bob converges on both
    for _ in 0..50 {
        let messages = bob.store.read().await.messages(&chat.id);
        let edited_seen = messages
            .iter()
            .any(|m| m.id == first.id && m.is_edited && m.content == "первое, изменено");
        let deleted_seen = messages
            .iter()
            .any(|m| m.id == second.id && m.is_deleted && m.content.is_empty());
        if edited_seen && deleted_seen {
            // The tombstone keeps its place in the thread.
            assert_eq!(messages.len(), 2);
            return;
        }
        sleep(POLL).await;
    }
    panic!("edit or delete never reached the other client");
}

#[tokio::test]
async fn test_block_stops_sends_before_the_network() {
    let backend = Arc::new(InMemoryBackend::new());
    let alice = client(&backend, "u1", "Иван Петров").await;
    let bob = client(&backend, "u2", "Мария Сидорова").await;

    let chat = api::start_chat(&alice, "u2".to_string(), None).await.unwrap();
    wait_for_chat(&bob, &chat.id).await;

    // Bob blocks Alice; Alice's client learns on its next refresh.
    api::block_user(&bob, "u1".to_string()).await.unwrap();
    alice.blocklist.write().await.refresh().await.unwrap();
    assert!(api::is_blocked_by(&alice, "u2".to_string()).await.unwrap());

    let attempts_before = backend.message_insert_attempts();
    let err = api::send_chat_message(&alice, chat.id.clone(), "привет".to_string(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BaraholkaError::RecipientBlocked));
    // Rejected client-side: the backend never saw the write.
    assert_eq!(backend.message_insert_attempts(), attempts_before);

    // Unblock and the thread opens up again.
    api::unblock_user(&bob, "u1".to_string()).await.unwrap();
    alice.blocklist.write().await.refresh().await.unwrap();
    api::send_chat_message(&alice, chat.id.clone(), "привет".to_string(), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_backend_policy_backstops_stale_blocklist() {
    let backend = Arc::new(InMemoryBackend::new());
    let alice = client(&backend, "u1", "Иван Петров").await;
    let bob = client(&backend, "u2", "Мария Сидорова").await;

    let chat = api::start_chat(&alice, "u2".to_string(), None).await.unwrap();
    wait_for_chat(&bob, &chat.id).await;

    // Bob blocks Alice but Alice's cached blocklist is stale, so her
    // client lets the send through to the backend.
    api::block_user(&bob, "u1".to_string()).await.unwrap();

    let attempts_before = backend.message_insert_attempts();
    let err = api::send_chat_message(&alice, chat.id.clone(), "привет".to_string(), None)
        .await
        .unwrap_err();
    // Same error either way; the UI cannot tell which side refused.
    assert!(matches!(err, BaraholkaError::RecipientBlocked));
    assert_eq!(backend.message_insert_attempts(), attempts_before + 1);
}

#[tokio::test]
async fn test_typing_indicator_appears_and_expires() {
    let backend = Arc::new(InMemoryBackend::new());
    let alice = client(&backend, "u1", "Иван Петров").await;
    let bob = client(&backend, "u2", "Мария Сидорова").await;

    let chat = api::start_chat(&alice, "u2".to_string(), None).await.unwrap();
    wait_for_chat(&bob, &chat.id).await;
    let mut bob_rx = bob.events.subscribe();

    api::set_typing(&alice, chat.id.clone()).await.unwrap();

    // Bob's indicator lights up...
    loop {
        match next_event(&mut bob_rx).await {
            UiEvent::TypingChanged { chat_id, users } => {
                assert_eq!(chat_id, chat.id);
                assert_eq!(users, vec!["u1".to_string()]);
                break;
            }
            _ => continue,
        }
    }
    assert_eq!(
        api::get_typing_users(&bob, chat.id.clone()).await.unwrap(),
        vec!["u1".to_string()]
    );

    // ...and with no further pings it goes dark after the TTL.
    for _ in 0..50 {
        if api::get_typing_users(&bob, chat.id.clone())
            .await
            .unwrap()
            .is_empty()
        {
            return;
        }
        sleep(POLL).await;
    }
    panic!("typing indicator never expired");
}

#[tokio::test]
async fn test_new_message_fans_out_one_notification() {
    let backend = Arc::new(InMemoryBackend::new());
    let alice = client(&backend, "u1", "Иван Петров").await;
    let bob = client(&backend, "u2", "Мария Сидорова").await;

    let chat = api::start_chat(&alice, "u2".to_string(), None).await.unwrap();
    wait_for_chat(&bob, &chat.id).await;

    api::send_chat_message(&alice, chat.id.clone(), "Привет, ещё актуально?".to_string(), None)
        .await
        .unwrap();

    // The fan-out processor delivers on its next tick; the row then echoes
    // to Bob's feed.
    for _ in 0..50 {
        let notifications = api::get_notifications(&bob).await.unwrap();
        if notifications.len() == 1 {
            let n = &notifications[0];
            assert_eq!(n.kind, NotificationKind::NewMessage);
            assert_eq!(n.title, "Новое сообщение");
            assert_eq!(n.message, "Иван Петров: Привет, ещё актуально?");
            assert_eq!(n.related_id.as_deref(), Some(chat.id.as_str()));
            assert!(!n.is_read);
            // The sender gets nothing.
            assert!(api::get_notifications(&alice).await.unwrap().is_empty());
            return;
        }
        sleep(POLL).await;
    }
    panic!("notification never arrived");
}

#[tokio::test]
async fn test_mark_all_notifications_read_is_idempotent() {
    let backend = Arc::new(InMemoryBackend::new());
    let alice = client(&backend, "u1", "Иван Петров").await;
    let bob = client(&backend, "u2", "Мария Сидорова").await;

    let chat = api::start_chat(&alice, "u2".to_string(), None).await.unwrap();
    wait_for_chat(&bob, &chat.id).await;

    api::send_chat_message(&alice, chat.id.clone(), "раз".to_string(), None)
        .await
        .unwrap();
    api::send_chat_message(&alice, chat.id.clone(), "два".to_string(), None)
        .await
        .unwrap();

    for _ in 0..50 {
        if api::get_notifications(&bob).await.unwrap().len() == 2 {
            break;
        }
        sleep(POLL).await;
    }

    let moved = api::mark_all_notifications_read(&bob).await.unwrap();
    assert_eq!(moved, 2);
    assert!(api::get_notifications(&bob)
        .await
        .unwrap()
        .iter()
        .all(|n| n.is_read));

    // Second call has nothing to do.
    let moved = api::mark_all_notifications_read(&bob).await.unwrap();
    assert_eq!(moved, 0);
}

#[tokio::test]
async fn test_clear_notifications_survives_refused_delete() {
    let backend = Arc::new(InMemoryBackend::new().refusing_notification_deletes());
    let alice = client(&backend, "u1", "Иван Петров").await;
    let bob = client(&backend, "u2", "Мария Сидорова").await;

    let chat = api::start_chat(&alice, "u2".to_string(), None).await.unwrap();
    wait_for_chat(&bob, &chat.id).await;
    api::send_chat_message(&alice, chat.id.clone(), "привет".to_string(), None)
        .await
        .unwrap();

    for _ in 0..50 {
        if !api::get_notifications(&bob).await.unwrap().is_empty() {
            break;
        }
        sleep(POLL).await;
    }

    // The backend refuses the delete; clearing falls back to tombstones.
    api::clear_notifications(&bob).await.unwrap();
    assert!(api::get_notifications(&bob).await.unwrap().is_empty());

    // The rows survive backend-side, flagged cleared.
    let rows = backend
        .query_notifications(&[Filter::Eq("userId", "u2".to_string())])
        .await
        .unwrap();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|n| n.is_cleared && n.is_read));

    // Clearing an already-empty panel is a no-op.
    api::clear_notifications(&bob).await.unwrap();
}

#[tokio::test]
async fn test_moderation_chat_delete_cascades_to_participants() {
    let backend = Arc::new(InMemoryBackend::new());
    let alice = client(&backend, "u1", "Иван Петров").await;
    let bob = client(&backend, "u2", "Мария Сидорова").await;

    let chat = api::start_chat(&alice, "u2".to_string(), None).await.unwrap();
    wait_for_chat(&bob, &chat.id).await;
    api::send_chat_message(&alice, chat.id.clone(), "привет".to_string(), None)
        .await
        .unwrap();

    // A moderation session that is not a participant takes the thread down.
    let moderator = client(&backend, "u9", "Модератор").await;
    api::delete_chat(&moderator, chat.id.clone()).await.unwrap();

    let rows = backend
        .query_chats(&[Filter::Eq("id", chat.id.clone())])
        .await
        .unwrap();
    assert!(rows.is_empty());

    for _ in 0..50 {
        let gone = api::get_chats(&alice).await.unwrap().is_empty()
            && alice.store.read().await.messages(&chat.id).is_empty()
            && api::get_chats(&bob).await.unwrap().is_empty()
            && bob.store.read().await.messages(&chat.id).is_empty();
        if gone {
            return;
        }
        sleep(POLL).await;
    }
    panic!("chat deletion never reached the participants");
}

#[tokio::test]
async fn test_attachment_only_send() {
    let backend = Arc::new(InMemoryBackend::new());
    let alice = client(&backend, "u1", "Иван Петров").await;
    let bob = client(&backend, "u2", "Мария Сидорова").await;

    let chat = api::start_chat(&alice, "u2".to_string(), None).await.unwrap();
    wait_for_chat(&bob, &chat.id).await;

    let dir = tempfile::tempdir().unwrap();
    let photo = dir.path().join("photo.jpg");
    std::fs::write(&photo, b"jpeg bytes").unwrap();

    // No text at all: the attachment alone makes the send valid.
    let sent = api::send_chat_message(&alice, chat.id.clone(), String::new(), Some(photo))
        .await
        .unwrap();
    assert_eq!(
        sent.attachment_url.as_deref(),
        Some("https://blobs.baraholka.test/photo.jpg")
    );

    for _ in 0..50 {
        let messages = bob.store.read().await.messages(&chat.id);
        if let Some(received) = messages.first() {
            assert_eq!(received.attachment_url, sent.attachment_url);
            return;
        }
        sleep(POLL).await;
    }
    panic!("attachment message never arrived");
}

#[tokio::test]
async fn test_moderation_notices_reach_the_owner() {
    let backend = Arc::new(InMemoryBackend::new());
    let alice = client(&backend, "u1", "Иван Петров").await;
    let bob = client(&backend, "u2", "Мария Сидорова").await;

    // Platform-side moderation outcome for Bob's listing, queued on
    // whichever client performed the action.
    api::notify_listing_approved(
        &alice,
        "u2".to_string(),
        "l1".to_string(),
        "BMW M5 F90".to_string(),
    )
    .await
    .unwrap();
    api::notify_review_received(&alice, "u2".to_string(), "r1".to_string(), 5)
        .await
        .unwrap();

    for _ in 0..50 {
        let notifications = api::get_notifications(&bob).await.unwrap();
        if notifications.len() == 2 {
            assert!(notifications.iter().any(|n| {
                n.kind == NotificationKind::ListingApproved
                    && n.message == "Ваше объявление \"BMW M5 F90\" прошло модерацию и опубликовано"
            }));
            assert!(notifications.iter().any(|n| {
                n.kind == NotificationKind::NewReview
                    && n.message == "Вы получили новый отзыв с оценкой 5/5"
            }));
            return;
        }
        sleep(POLL).await;
    }
    panic!("moderation notifications never arrived");
}
