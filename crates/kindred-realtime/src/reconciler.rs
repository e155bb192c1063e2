//! Message stream reconciliation.
//!
//! [`MessageLog`] is the ordered, id-unique list for one conversation. Every
//! source of rows (initial fetch, push events, the rows returned by our own
//! writes) goes through the same idempotent [`MessageLog::merge`], so a
//! message we sent and its push echo collapse into one entry by id.
//!
//! [`MessageReconciler`] wraps the log with the write operations and maps
//! backend results onto outcome enums the view can branch on.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use kindred_shared::constants::{DEFAULT_REPORT_REASON, MAX_BODY_LEN};
use kindred_shared::{
    BackendError, ConversationId, DataStore, Message, MessageId, NewMessage, NewReport, RowEvent,
    UserId,
};

// ---------------------------------------------------------------------------
// MessageLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MessageLog {
    conversation: ConversationId,
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new(conversation: ConversationId) -> Self {
        Self {
            conversation,
            messages: Vec::new(),
        }
    }

    /// Discard everything and seed from `messages`.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages.clear();
        for message in messages {
            self.merge(message);
        }
    }

    pub fn apply(&mut self, event: RowEvent<Message>) -> bool {
        match event {
            RowEvent::Insert(message) | RowEvent::Update(message) => self.merge(message),
            RowEvent::Delete(old) => {
                debug!(conversation = %self.conversation, old = %old, "Ignoring hard delete");
                false
            }
        }
    }

    /// Insert or overwrite by id, keeping ascending `created_at` order with
    /// ties in arrival order. Returns `false` when nothing changed.
    pub fn merge(&mut self, message: Message) -> bool {
        if message.conversation_id != self.conversation {
            debug!(
                conversation = %self.conversation,
                other = %message.conversation_id,
                "Dropping message for another conversation"
            );
            return false;
        }

        if let Some(pos) = self.position(message.id) {
            let current = &self.messages[pos];
            if *current == message {
                return false;
            }
            if current.created_at == message.created_at {
                self.messages[pos] = message;
                return true;
            }
            self.messages.remove(pos);
        }

        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        true
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    EmptyBody,
    TooLong { len: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent(Message),
    /// Refused locally; nothing was sent.
    Rejected(SendRejection),
    Failed(BackendError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    Deleted(Message),
    /// The write went through but matched nothing, or the local user is not
    /// the sender.
    NotPermitted,
    Failed(BackendError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Reported,
    UnknownMessage,
    Failed(BackendError),
}

// ---------------------------------------------------------------------------
// MessageReconciler
// ---------------------------------------------------------------------------

pub struct MessageReconciler {
    conversation: ConversationId,
    me: UserId,
    store: Arc<dyn DataStore>,
    log: Mutex<MessageLog>,
    revision: watch::Sender<u64>,
}

impl MessageReconciler {
    pub fn new(conversation: ConversationId, me: UserId, store: Arc<dyn DataStore>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            conversation,
            me,
            store,
            log: Mutex::new(MessageLog::new(conversation)),
            revision,
        }
    }

    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    fn lock(&self) -> MutexGuard<'_, MessageLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Fetch the conversation and replace the local list with it.
    pub async fn load_initial(&self) -> Result<Vec<Message>, BackendError> {
        let fetched = self.store.fetch_messages(self.conversation).await?;
        let snapshot = {
            let mut log = self.lock();
            log.replace_all(fetched);
            log.messages().to_vec()
        };
        self.bump();
        info!(conversation = %self.conversation, count = snapshot.len(), "Messages loaded");
        Ok(snapshot)
    }

    pub fn apply_remote_event(&self, event: RowEvent<Message>) -> bool {
        let changed = self.lock().apply(event);
        if changed {
            self.bump();
        }
        changed
    }

    fn merge(&self, message: Message) {
        if self.lock().merge(message) {
            self.bump();
        }
    }

    pub async fn send_message(&self, body: &str) -> SendOutcome {
        let body = body.trim();
        if body.is_empty() {
            return SendOutcome::Rejected(SendRejection::EmptyBody);
        }
        if body.len() > MAX_BODY_LEN {
            return SendOutcome::Rejected(SendRejection::TooLong {
                len: body.len(),
                max: MAX_BODY_LEN,
            });
        }

        let new = NewMessage {
            conversation_id: self.conversation,
            sender_id: self.me,
            body: body.to_string(),
        };
        match self.store.insert_message(new).await {
            Ok(created) => {
                debug!(conversation = %self.conversation, message = %created.id, "Message sent");
                self.merge(created.clone());
                SendOutcome::Sent(created)
            }
            Err(e) => {
                warn!(conversation = %self.conversation, error = %e, "Send failed");
                SendOutcome::Failed(e)
            }
        }
    }

    /// Tombstone one of our own messages for everyone.
    pub async fn soft_delete(&self, id: MessageId) -> DeleteOutcome {
        let known_sender = self.lock().get(id).map(|m| m.sender_id);
        if known_sender.is_some_and(|sender| sender != self.me) {
            debug!(message = %id, "Refusing to delete another participant's message");
            return DeleteOutcome::NotPermitted;
        }

        match self.store.soft_delete_message(id, self.me, Utc::now()).await {
            Ok(Some(row)) => {
                self.merge(row.clone());
                DeleteOutcome::Deleted(row)
            }
            Ok(None) => {
                info!(message = %id, "Delete matched no rows");
                DeleteOutcome::NotPermitted
            }
            Err(e) => {
                warn!(message = %id, error = %e, "Delete failed");
                DeleteOutcome::Failed(e)
            }
        }
    }

    pub async fn report(&self, id: MessageId, reason: Option<&str>) -> ReportOutcome {
        let Some(sender) = self.lock().get(id).map(|m| m.sender_id) else {
            return ReportOutcome::UnknownMessage;
        };

        let report = NewReport {
            conversation_id: self.conversation,
            reporter_id: self.me,
            reported_user_id: sender,
            message_id: id,
            reason: reason
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or(DEFAULT_REPORT_REASON)
                .to_string(),
        };
        match self.store.insert_report(report).await {
            Ok(()) => ReportOutcome::Reported,
            Err(e) => {
                warn!(message = %id, error = %e, "Report failed");
                ReportOutcome::Failed(e)
            }
        }
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.lock().messages().to_vec()
    }

    pub fn get(&self, id: MessageId) -> Option<Message> {
        self.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Bumped on every change to the list.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
