//! # kindred-demo
//!
//! Runs a scripted two-participant conversation against the SQLite store and
//! the in-process push hub, logging each side's view model as it goes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use kindred_client::{
    AppState, ClientConfig, ConversationView, MemoryClipboard, MessageView, StaticSession,
};
use kindred_realtime::LocalHub;
use kindred_shared::constants::APP_NAME;
use kindred_shared::{ConversationId, UserId};
use kindred_store::{Database, SqliteStore};

fn participant(
    config: &ClientConfig,
    store: &SqliteStore,
    hub: &LocalHub,
    user: UserId,
) -> AppState {
    AppState::new(
        config.clone(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(hub.clone()),
        Arc::new(StaticSession::signed_in(user)),
        Arc::new(MemoryClipboard::new()),
    )
}

fn log_view(who: &str, view: &ConversationView) {
    let lines: Vec<String> = view
        .messages()
        .iter()
        .map(|m: &MessageView| format!("{}: {}", m.sender_id.short(), m.text))
        .collect();
    info!(
        who,
        typing = view.is_other_typing(),
        status = ?view.status().text(),
        messages = ?lines,
        "View"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kindred_client::init_tracing();

    info!("Starting {} demo v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let db = match &config.database_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            Database::open_at(path)?
        }
        None => Database::new()?,
    };

    let hub = LocalHub::new();
    let store = SqliteStore::new(db).with_change_sink(Arc::new(hub.clone()));

    let (alice, bob) = (UserId::new(), UserId::new());
    let alice_app = participant(&config, &store, &hub, alice);
    let bob_app = participant(&config, &store, &hub, bob);
    alice_app.sign_in().await?;
    bob_app.sign_in().await?;

    let conversation = ConversationId::new();
    let alice_view = ConversationView::open(&alice_app, conversation).await?;
    let bob_view = ConversationView::open(&bob_app, conversation).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    info!(
        bob_sees_alice = %bob_view.peer_presence(alice).await.describe(chrono::Utc::now()),
        "Presence"
    );

    // Alice types, then pauses past the debounce window.
    for _ in 0..5 {
        alice_view.input_changed();
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    log_view("bob", &bob_view);
    tokio::time::sleep(config.typing_debounce + Duration::from_millis(500)).await;
    log_view("bob", &bob_view);

    alice_view.send("hi bob").await;
    bob_view.input_changed();
    bob_view.send("hey alice").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    log_view("alice", &alice_view);

    // Bob cannot delete Alice's message; Alice can.
    let first = alice_view
        .messages()
        .first()
        .map(|m| m.id)
        .context("no messages")?;
    let outcome = bob_view.delete_for_everyone(first).await;
    info!(?outcome, "Bob deletes Alice's message");
    let outcome = alice_view.delete_for_everyone(first).await;
    info!(deleted = matches!(outcome, kindred_realtime::DeleteOutcome::Deleted(_)), "Alice deletes her message");
    tokio::time::sleep(Duration::from_millis(50)).await;
    log_view("bob", &bob_view);

    alice_view.close();
    bob_view.close();
    alice_app.sign_out();
    tokio::time::sleep(Duration::from_millis(50)).await;
    info!(
        bob_sees_alice = %bob_view.peer_presence(alice).await.describe(chrono::Utc::now()),
        "Presence after sign-out"
    );
    bob_app.sign_out();

    Ok(())
}
