use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use kindred_client::{AppState, ClientConfig, ClientError, ConversationView, MemoryClipboard, StaticSession};
use kindred_realtime::{
    ChannelError, DeleteOutcome, LocalHub, PresenceDisplay, PushTransport, SendOutcome,
    Subscription, SubscriptionId, SubscriptionSpec,
};
use kindred_shared::constants::TABLE_MESSAGES;
use kindred_shared::{
    ChangeSink, ChannelKey, ConversationId, DataStore, Message, MessageId, NewMessage, RowChange,
    TypingRow, UserId,
};
use kindred_store::{Database, SqliteStore};

struct World {
    hub: LocalHub,
    store: SqliteStore,
    conversation: ConversationId,
}

fn world() -> World {
    let hub = LocalHub::new();
    let store = SqliteStore::new(Database::open_in_memory().unwrap())
        .with_change_sink(Arc::new(hub.clone()));
    World {
        hub,
        store,
        conversation: ConversationId::new(),
    }
}

fn app(world: &World, session: StaticSession) -> AppState {
    AppState::new(
        ClientConfig::default(),
        Arc::new(world.store.clone()),
        Arc::new(world.store.clone()),
        Arc::new(world.hub.clone()),
        Arc::new(session),
        Arc::new(MemoryClipboard::new()),
    )
}

async fn signed_in(world: &World, user: UserId) -> AppState {
    let app = app(world, StaticSession::signed_in(user));
    app.sign_in().await.unwrap();
    app
}

/// With the clock paused, a sleep only returns once every task is idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_send_and_echo_show_one_entry() {
    let w = world();
    let (alice, bob) = (UserId::new(), UserId::new());
    let alice_app = signed_in(&w, alice).await;
    let bob_app = signed_in(&w, bob).await;
    let alice_view = ConversationView::open(&alice_app, w.conversation).await.unwrap();
    let bob_view = ConversationView::open(&bob_app, w.conversation).await.unwrap();

    let SendOutcome::Sent(sent) = alice_view.send("hi").await else {
        panic!("send should succeed");
    };
    settle().await;

    for view in [&alice_view, &bob_view] {
        let messages = view.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, sent.id);
        assert_eq!(messages[0].text, "hi");
    }
    assert!(alice_view.messages()[0].is_mine);
    assert!(!bob_view.messages()[0].is_mine);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_delivery_is_collapsed() {
    let w = world();
    let alice_app = signed_in(&w, UserId::new()).await;
    let view = ConversationView::open(&alice_app, w.conversation).await.unwrap();

    let message = Message {
        id: MessageId::new(),
        conversation_id: w.conversation,
        sender_id: UserId::new(),
        body: "seven".into(),
        created_at: chrono::DateTime::parse_from_rfc3339("2024-05-01T10:00:01Z")
            .unwrap()
            .with_timezone(&Utc),
        deleted_at: None,
    };
    let change = RowChange::insert(TABLE_MESSAGES, &message).unwrap();
    w.hub.publish(change.clone());
    w.hub.publish(change);
    settle().await;

    let messages = view.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, message.id);
}

#[tokio::test(start_paused = true)]
async fn test_non_sender_delete_is_not_permitted() {
    let w = world();
    let (alice, bob) = (UserId::new(), UserId::new());
    let alice_app = signed_in(&w, alice).await;
    let bob_app = signed_in(&w, bob).await;
    let alice_view = ConversationView::open(&alice_app, w.conversation).await.unwrap();
    let bob_view = ConversationView::open(&bob_app, w.conversation).await.unwrap();

    let SendOutcome::Sent(sent) = alice_view.send("mine").await else {
        panic!("send should succeed");
    };
    settle().await;

    let actions = bob_view.actions_for(sent.id).unwrap();
    assert!(!actions.delete_for_everyone);
    assert!(actions.copy && actions.delete_for_me && actions.report);

    assert_eq!(bob_view.delete_for_everyone(sent.id).await, DeleteOutcome::NotPermitted);
    assert_eq!(
        bob_view.status().text().as_deref(),
        Some("You can only delete your own messages")
    );

    let stored = w.store.fetch_messages(w.conversation).await.unwrap();
    assert_eq!(stored[0].deleted_at, None);
    assert!(!bob_view.messages()[0].is_deleted);
}

#[tokio::test(start_paused = true)]
async fn test_sender_delete_shows_placeholder_everywhere() {
    let w = world();
    let (alice, bob) = (UserId::new(), UserId::new());
    let alice_app = signed_in(&w, alice).await;
    let bob_app = signed_in(&w, bob).await;
    let alice_view = ConversationView::open(&alice_app, w.conversation).await.unwrap();
    let bob_view = ConversationView::open(&bob_app, w.conversation).await.unwrap();

    let SendOutcome::Sent(sent) = alice_view.send("regret").await else {
        panic!("send should succeed");
    };
    assert!(matches!(
        alice_view.delete_for_everyone(sent.id).await,
        DeleteOutcome::Deleted(_)
    ));
    settle().await;

    for view in [&alice_view, &bob_view] {
        let messages = view.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_deleted);
        assert_eq!(messages[0].text, "Message deleted");
    }
    assert!(!bob_view.copy(sent.id));
    let actions = alice_view.actions_for(sent.id).unwrap();
    assert!(!actions.copy);
    assert!(!actions.delete_for_everyone);
}

#[tokio::test(start_paused = true)]
async fn test_delete_for_me_is_local_only() {
    let w = world();
    let (alice, bob) = (UserId::new(), UserId::new());
    let alice_app = signed_in(&w, alice).await;
    let bob_app = signed_in(&w, bob).await;
    let alice_view = ConversationView::open(&alice_app, w.conversation).await.unwrap();
    let bob_view = ConversationView::open(&bob_app, w.conversation).await.unwrap();

    let SendOutcome::Sent(sent) = alice_view.send("hello").await else {
        panic!("send should succeed");
    };
    settle().await;

    assert!(bob_view.delete_for_me(sent.id));
    assert!(bob_view.messages().is_empty());
    assert_eq!(alice_view.messages().len(), 1);

    // Survives reopening.
    bob_view.close();
    drop(bob_view);
    let reopened = ConversationView::open(&bob_app, w.conversation).await.unwrap();
    assert!(reopened.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_subscribe_never_tracks() {
    let w = world();
    w.hub.withhold_acknowledgements(true);
    let me = UserId::new();
    let app = signed_in(&w, me).await;
    settle().await;

    assert_eq!(w.hub.track_calls(), 0);
    assert!(w.hub.roster_keys(&ChannelKey::global_presence().to_topic()).is_empty());
    let session = app.active_session().unwrap();
    assert!(!session.presence.is_online(&me));
}

#[tokio::test(start_paused = true)]
async fn test_typing_pause_is_seen_as_true_then_false_once() {
    let w = world();
    let (alice, bob) = (UserId::new(), UserId::new());
    let alice_app = signed_in(&w, alice).await;
    let bob_app = signed_in(&w, bob).await;
    let alice_view = ConversationView::open(&alice_app, w.conversation).await.unwrap();
    let bob_view = ConversationView::open(&bob_app, w.conversation).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut flag = bob_view.other_typing();
    let recorder = tokio::spawn({
        let seen = seen.clone();
        async move {
            while flag.changed().await.is_ok() {
                let value = *flag.borrow_and_update();
                seen.lock().unwrap().push(value);
            }
        }
    });

    alice_view.input_changed();
    tokio::time::sleep(Duration::from_millis(300)).await;
    alice_view.input_changed();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    assert!(!bob_view.is_other_typing());
    recorder.abort();
}

#[tokio::test(start_paused = true)]
async fn test_sending_clears_typing_immediately() {
    let w = world();
    let (alice, bob) = (UserId::new(), UserId::new());
    let alice_app = signed_in(&w, alice).await;
    let bob_app = signed_in(&w, bob).await;
    let alice_view = ConversationView::open(&alice_app, w.conversation).await.unwrap();
    let bob_view = ConversationView::open(&bob_app, w.conversation).await.unwrap();

    alice_view.input_changed();
    settle().await;
    assert!(bob_view.is_other_typing());

    alice_view.send("done").await;
    settle().await;
    assert!(!bob_view.is_other_typing());
}

#[tokio::test(start_paused = true)]
async fn test_stale_typing_expires_without_explicit_false() {
    let w = world();
    let bob_app = signed_in(&w, UserId::new()).await;
    let bob_view = ConversationView::open(&bob_app, w.conversation).await.unwrap();

    // A participant whose tab died right after announcing.
    w.store
        .upsert_typing(TypingRow {
            conversation_id: w.conversation,
            user_id: UserId::new(),
            is_typing: true,
            updated_at: Utc::now(),
        })
        .await
        .unwrap();
    settle().await;
    assert!(bob_view.is_other_typing());

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert!(bob_view.is_other_typing());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!bob_view.is_other_typing());
}

#[tokio::test(start_paused = true)]
async fn test_close_unsubscribes_and_sends_final_false() {
    let w = world();
    let (alice, bob) = (UserId::new(), UserId::new());
    let alice_app = signed_in(&w, alice).await;
    let bob_app = signed_in(&w, bob).await;
    let alice_view = ConversationView::open(&alice_app, w.conversation).await.unwrap();
    let bob_view = ConversationView::open(&bob_app, w.conversation).await.unwrap();
    let chat_topic = ChannelKey::messages(w.conversation).to_topic();
    assert_eq!(w.hub.subscriber_count(&chat_topic), 2);

    alice_view.input_changed();
    settle().await;
    assert!(bob_view.is_other_typing());

    alice_view.close();
    alice_view.close();
    settle().await;

    assert!(alice_view.is_closed());
    assert_eq!(w.hub.subscriber_count(&chat_topic), 1);
    assert!(!bob_view.is_other_typing());
    // Presence is global and survives the view.
    assert!(alice_app.active_session().unwrap().presence.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_presence_follows_sign_in_and_out() {
    let w = world();
    let (alice, bob) = (UserId::new(), UserId::new());
    let alice_app = signed_in(&w, alice).await;
    let bob_app = signed_in(&w, bob).await;
    let bob_view = ConversationView::open(&bob_app, w.conversation).await.unwrap();
    settle().await;

    assert_eq!(bob_view.peer_presence(alice).await, PresenceDisplay::Online);

    alice_app.sign_out();
    settle().await;

    assert!(!alice_app.is_signed_in());
    assert!(matches!(
        bob_view.peer_presence(alice).await,
        PresenceDisplay::LastSeen(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_no_session_refuses_to_open() {
    let w = world();
    let app = app(&w, StaticSession::new());

    assert!(matches!(app.sign_in().await, Err(ClientError::NoSession)));
    assert!(matches!(
        ConversationView::open(&app, w.conversation).await,
        Err(ClientError::NoSession)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_copy_and_report() {
    let w = world();
    let (alice, bob) = (UserId::new(), UserId::new());
    let alice_app = signed_in(&w, alice).await;
    let clipboard = Arc::new(MemoryClipboard::new());
    let bob_app = AppState::new(
        ClientConfig::default(),
        Arc::new(w.store.clone()),
        Arc::new(w.store.clone()),
        Arc::new(w.hub.clone()),
        Arc::new(StaticSession::signed_in(bob)),
        clipboard.clone(),
    );
    bob_app.sign_in().await.unwrap();
    let alice_view = ConversationView::open(&alice_app, w.conversation).await.unwrap();
    let bob_view = ConversationView::open(&bob_app, w.conversation).await.unwrap();

    let SendOutcome::Sent(sent) = alice_view.send("copy me").await else {
        panic!("send should succeed");
    };
    settle().await;

    assert!(bob_view.copy(sent.id));
    assert_eq!(clipboard.contents().as_deref(), Some("copy me"));

    assert_eq!(
        bob_view.report(sent.id, None).await,
        kindred_realtime::ReportOutcome::Reported
    );
    assert_eq!(bob_view.status().text().as_deref(), Some("Reported"));
    assert_eq!(bob_view.messages().len(), 1);
}

/// Hub that refuses every typing subscription.
struct NoTypingTransport(LocalHub);

#[async_trait::async_trait]
impl PushTransport for NoTypingTransport {
    async fn subscribe(&self, spec: SubscriptionSpec) -> Result<Subscription, ChannelError> {
        if spec.topic.starts_with("typing:") {
            return Err(ChannelError::SubscribeFailed("typing unavailable".into()));
        }
        self.0.subscribe(spec).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChannelError> {
        self.0.unsubscribe(id).await
    }

    async fn track(&self, id: SubscriptionId, payload: serde_json::Value) -> Result<(), ChannelError> {
        self.0.track(id, payload).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_typing_subscribe_releases_messages_channel() {
    let w = world();
    let app = AppState::new(
        ClientConfig::default(),
        Arc::new(w.store.clone()),
        Arc::new(w.store.clone()),
        Arc::new(NoTypingTransport(w.hub.clone())),
        Arc::new(StaticSession::signed_in(UserId::new())),
        Arc::new(MemoryClipboard::new()),
    );
    app.sign_in().await.unwrap();

    let opened = ConversationView::open(&app, w.conversation).await;
    assert!(matches!(opened, Err(ClientError::Channel(_))));
    settle().await;

    let messages_key = ChannelKey::messages(w.conversation);
    let session = app.active_session().unwrap();
    assert!(!session.channels.is_active(&messages_key));
    assert_eq!(session.channels.active_count(), 1);
    assert_eq!(w.hub.subscriber_count(&messages_key.to_topic()), 0);
}

#[tokio::test(start_paused = true)]
async fn test_push_burst_converges_on_backend_rows() {
    let w = world();
    let (alice, bob) = (UserId::new(), UserId::new());
    let bob_app = signed_in(&w, bob).await;
    let view = ConversationView::open(&bob_app, w.conversation).await.unwrap();

    for i in 0..300 {
        w.store
            .insert_message(NewMessage {
                conversation_id: w.conversation,
                sender_id: alice,
                body: format!("burst {i}"),
            })
            .await
            .unwrap();
    }
    settle().await;

    let messages = view.messages();
    assert_eq!(messages.len(), 300);
    let ids: HashSet<MessageId> = messages.iter().map(|m| m.id).collect();
    assert_eq!(ids.len(), 300);
    assert!(messages.windows(2).all(|pair| pair[0].created_at <= pair[1].created_at));
}
