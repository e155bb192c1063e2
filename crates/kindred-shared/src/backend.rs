//! Contracts for the collaborators the realtime core talks to.
//!
//! Each call returns either a success payload or a [`BackendError`]; callers
//! branch on both. Conditional writes report "matched nothing" through their
//! success value so it can never be confused with a transport failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BackendError;
use crate::models::{Message, NewMessage, NewReport, TypingRow};
use crate::protocol::RowChange;
use crate::types::{ConversationId, MessageId, UserId};

/// Remote Data Store: the system of record for messages, typing rows,
/// reports and last-seen timestamps.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// All messages of a conversation, ascending by `created_at`.
    async fn fetch_messages(&self, conversation: ConversationId)
        -> Result<Vec<Message>, BackendError>;

    /// Insert a message and return the created row.
    async fn insert_message(&self, message: NewMessage) -> Result<Message, BackendError>;

    /// Set `deleted_at` on the row matching both `id` and `sender`.
    ///
    /// Returns `Ok(None)` when no row matched (not the sender, or no such
    /// message).
    async fn soft_delete_message(
        &self,
        id: MessageId,
        sender: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<Message>, BackendError>;

    /// Upsert keyed by `(conversation_id, user_id)`.
    async fn upsert_typing(&self, row: TypingRow) -> Result<(), BackendError>;

    async fn insert_report(&self, report: NewReport) -> Result<(), BackendError>;

    /// Record that `user` was active at `at`. Never moves the stored value
    /// backwards.
    async fn touch_last_seen(&self, user: UserId, at: DateTime<Utc>) -> Result<(), BackendError>;

    async fn fetch_last_seen(&self, user: UserId) -> Result<Option<DateTime<Utc>>, BackendError>;
}

/// Device-local preferences that never leave this client.
pub trait LocalPrefs: Send + Sync {
    /// Messages the user removed from their own view ("delete for me").
    fn hidden_messages(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<Vec<MessageId>, BackendError>;

    fn hide_message(
        &self,
        conversation: ConversationId,
        user: UserId,
        message: MessageId,
    ) -> Result<(), BackendError>;
}

/// Session/Auth provider: who is signed in, if anyone.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_user(&self) -> Option<UserId>;
}

/// Receives the row changes a store commits, for fan-out to push subscribers.
pub trait ChangeSink: Send + Sync {
    fn publish(&self, change: RowChange);
}
