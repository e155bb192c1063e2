//! One open conversation.
//!
//! A [`ConversationView`] owns the message and typing channels of its
//! conversation, the reconciler fed by the first, the remote typing flag fed
//! by the second, and the local typing broadcaster. Everything it started is
//! torn down by [`ConversationView::close`] (or on drop) without waiting.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use kindred_realtime::{
    spawn_typing_watch, ChannelEvent, ChannelHandle, DeleteOutcome, MessageReconciler, PresenceDisplay,
    ReportOutcome, SendOutcome, SendRejection, TypingBroadcaster,
};
use kindred_shared::{
    ChannelKey, ConversationId, LocalPrefs, Message, MessageId, PushEvent, UserId,
};

use crate::clipboard::Clipboard;
use crate::error::ClientError;
use crate::state::{ActiveSession, AppState};
use crate::status::StatusLine;

/// A message as the view renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageView {
    pub id: MessageId,
    pub sender_id: UserId,
    /// Body, or the placeholder once deleted.
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub is_mine: bool,
}

/// Which menu entries are enabled for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageActions {
    pub copy: bool,
    pub delete_for_everyone: bool,
    pub delete_for_me: bool,
    pub report: bool,
}

impl MessageActions {
    pub fn for_message(message: &Message, me: UserId) -> Self {
        Self {
            copy: !message.is_deleted(),
            delete_for_everyone: message.sender_id == me && !message.is_deleted(),
            delete_for_me: true,
            report: true,
        }
    }
}

pub struct ConversationView {
    conversation: ConversationId,
    me: UserId,
    session: ActiveSession,
    reconciler: Arc<MessageReconciler>,
    typing: TypingBroadcaster,
    other_typing: watch::Receiver<bool>,
    hidden: Mutex<HashSet<MessageId>>,
    prefs: Arc<dyn LocalPrefs>,
    clipboard: Arc<dyn Clipboard>,
    status: StatusLine,
    tasks: Vec<JoinHandle<()>>,
    closed: AtomicBool,
}

impl ConversationView {
    /// Open the conversation for the signed-in user. Refused when nobody is
    /// signed in.
    pub async fn open(app: &AppState, conversation: ConversationId) -> Result<Self, ClientError> {
        let me = app
            .session
            .current_user()
            .await
            .ok_or(ClientError::NoSession)?;
        let session = app
            .active_session()
            .filter(|s| s.user == me)
            .ok_or(ClientError::NoSession)?;

        let status = StatusLine::new(&app.config);
        let reconciler = Arc::new(MessageReconciler::new(conversation, me, app.store.clone()));

        // Subscribe before the initial fetch; anything pushed meanwhile is
        // buffered and merges idempotently afterwards.
        let messages_key = ChannelKey::messages(conversation);
        let messages = session.channels.open(messages_key).await?;
        let typing_channel = match session.channels.open(ChannelKey::typing(conversation)).await {
            Ok(handle) => handle,
            Err(e) => {
                session.channels.close(&messages_key);
                return Err(e.into());
            }
        };

        if let Err(e) = reconciler.load_initial().await {
            warn!(conversation = %conversation, error = %e, "Initial load failed");
            status.failure("Could not load messages");
        }

        let hidden = match app.prefs.hidden_messages(conversation, me) {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "Hidden messages unavailable");
                HashSet::new()
            }
        };

        let pump = tokio::spawn(pump_messages(messages, reconciler.clone()));
        let (other_typing, typing_task) =
            spawn_typing_watch(typing_channel, me, app.config.typing_max_age());
        let typing =
            TypingBroadcaster::spawn(app.store.clone(), conversation, me, app.config.typing_debounce);

        info!(conversation = %conversation, user = %me.short(), "Conversation opened");

        Ok(Self {
            conversation,
            me,
            session,
            reconciler,
            typing,
            other_typing,
            hidden: Mutex::new(hidden),
            prefs: app.prefs.clone(),
            clipboard: app.clipboard.clone(),
            status,
            tasks: vec![pump, typing_task],
            closed: AtomicBool::new(false),
        })
    }

    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    fn hidden(&self) -> MutexGuard<'_, HashSet<MessageId>> {
        self.hidden.lock().unwrap_or_else(|p| p.into_inner())
    }

    // -- View model --

    /// Rendered list: ordered, tombstones as placeholders, "deleted for me"
    /// entries left out.
    pub fn messages(&self) -> Vec<MessageView> {
        let hidden = self.hidden();
        self.reconciler
            .snapshot()
            .into_iter()
            .filter(|m| !hidden.contains(&m.id))
            .map(|m| MessageView {
                id: m.id,
                sender_id: m.sender_id,
                text: m.display_body().to_string(),
                created_at: m.created_at,
                is_deleted: m.is_deleted(),
                is_mine: m.sender_id == self.me,
            })
            .collect()
    }

    /// Revision counter of the underlying list; changes on every merge.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.reconciler.subscribe()
    }

    pub fn is_other_typing(&self) -> bool {
        *self.other_typing.borrow()
    }

    pub fn other_typing(&self) -> watch::Receiver<bool> {
        self.other_typing.clone()
    }

    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    pub fn actions_for(&self, id: MessageId) -> Option<MessageActions> {
        self.reconciler
            .get(id)
            .map(|m| MessageActions::for_message(&m, self.me))
    }

    pub async fn peer_presence(&self, user: UserId) -> PresenceDisplay {
        self.session.presence.display(user).await
    }

    // -- Actions --

    /// Local input changed.
    pub fn input_changed(&self) {
        self.typing.keystroke();
    }

    pub async fn send(&self, body: &str) -> SendOutcome {
        let outcome = self.reconciler.send_message(body).await;
        match &outcome {
            SendOutcome::Sent(_) => self.typing.stop(),
            SendOutcome::Rejected(SendRejection::EmptyBody) => {}
            SendOutcome::Rejected(SendRejection::TooLong { max, .. }) => {
                self.status.no_effect(format!("Message is longer than {max} bytes"));
            }
            SendOutcome::Failed(_) => self.status.failure("Could not send message"),
        }
        outcome
    }

    pub async fn delete_for_everyone(&self, id: MessageId) -> DeleteOutcome {
        let outcome = self.reconciler.soft_delete(id).await;
        match &outcome {
            DeleteOutcome::Deleted(_) => self.status.success("Message deleted"),
            DeleteOutcome::NotPermitted => {
                self.status.no_effect("You can only delete your own messages")
            }
            DeleteOutcome::Failed(_) => self.status.failure("Could not delete message"),
        }
        outcome
    }

    /// Hide a message from this user's view only.
    pub fn delete_for_me(&self, id: MessageId) -> bool {
        match self.prefs.hide_message(self.conversation, self.me, id) {
            Ok(()) => {
                self.hidden().insert(id);
                self.status.success("Removed for you");
                true
            }
            Err(e) => {
                warn!(message = %id, error = %e, "Hide failed");
                self.status.failure("Could not remove message");
                false
            }
        }
    }

    pub fn copy(&self, id: MessageId) -> bool {
        let Some(message) = self.reconciler.get(id) else {
            return false;
        };
        if message.is_deleted() {
            self.status.no_effect("Nothing to copy");
            return false;
        }
        match self.clipboard.write_text(&message.body) {
            Ok(()) => {
                self.status.success("Copied");
                true
            }
            Err(e) => {
                warn!(error = %e, "Copy failed");
                self.status.failure("Could not copy");
                false
            }
        }
    }

    pub async fn report(&self, id: MessageId, reason: Option<&str>) -> ReportOutcome {
        let outcome = self.reconciler.report(id, reason).await;
        match &outcome {
            ReportOutcome::Reported => self.status.success("Reported"),
            ReportOutcome::UnknownMessage => self.status.no_effect("Message not found"),
            ReportOutcome::Failed(_) => self.status.failure("Could not report message"),
        }
        outcome
    }

    /// Leave the conversation. Cancels the typing timer, writes a final
    /// "not typing", and unsubscribes both channels, all without waiting.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.typing.shutdown();
        let closed = self.session.channels.close_conversation(self.conversation);
        for task in &self.tasks {
            task.abort();
        }
        info!(conversation = %self.conversation, closed, "Conversation closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump_messages(mut handle: ChannelHandle, reconciler: Arc<MessageReconciler>) {
    while let Some(event) = handle.next().await {
        match event {
            ChannelEvent::Push(PushEvent::Message(event)) => {
                reconciler.apply_remote_event(event);
            }
            ChannelEvent::Push(other) => {
                debug!(event = ?other, "Non-message event on message channel");
            }
            // Missed rows are only recoverable from the backend.
            ChannelEvent::Resync { skipped } => match reconciler.load_initial().await {
                Ok(_) => info!(conversation = %reconciler.conversation(), skipped, "Resynced messages"),
                Err(e) => warn!(conversation = %reconciler.conversation(), error = %e, "Resync failed"),
            },
        }
    }
    warn!(conversation = %reconciler.conversation(), "Message channel ended");
}
