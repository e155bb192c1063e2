//! Async `DataStore` / `LocalPrefs` facade over [`Database`].
//!
//! Every write that the push infrastructure would announce is forwarded to
//! the configured [`ChangeSink`] after the connection lock is released.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use kindred_shared::constants::{TABLE_MESSAGES, TABLE_TYPING};
use kindred_shared::{
    BackendError, ChangeSink, ConversationId, DataStore, LocalPrefs, Message, MessageId,
    NewMessage, NewReport, RowChange, TypingRow, UserId,
};

use crate::database::Database;
use crate::error::StoreError;

/// Shared handle to a SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
    sink: Option<Arc<dyn ChangeSink>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            sink: None,
        }
    }

    /// Announce committed row changes to `sink`.
    pub fn with_change_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>, StoreError> {
        self.db.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn announce(&self, change: Result<RowChange, serde_json::Error>) {
        let Some(sink) = &self.sink else {
            return;
        };
        match change {
            Ok(change) => sink.publish(change),
            Err(e) => warn!(error = %e, "Failed to encode row change"),
        }
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn fetch_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Message>, BackendError> {
        let messages = self.lock()?.get_messages_for_conversation(conversation)?;
        debug!(conversation = %conversation, count = messages.len(), "Fetched messages");
        Ok(messages)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, BackendError> {
        let created = self.lock()?.insert_message(&message)?;
        self.announce(RowChange::insert(TABLE_MESSAGES, &created));
        Ok(created)
    }

    async fn soft_delete_message(
        &self,
        id: MessageId,
        sender: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<Message>, BackendError> {
        let updated = self.lock()?.soft_delete_message(id, sender, at)?;
        if let Some(ref row) = updated {
            self.announce(RowChange::update(TABLE_MESSAGES, row));
        }
        Ok(updated)
    }

    async fn upsert_typing(&self, row: TypingRow) -> Result<(), BackendError> {
        let created = self.lock()?.upsert_typing(&row)?;
        if created {
            self.announce(RowChange::insert(TABLE_TYPING, &row));
        } else {
            self.announce(RowChange::update(TABLE_TYPING, &row));
        }
        Ok(())
    }

    async fn insert_report(&self, report: NewReport) -> Result<(), BackendError> {
        let id = self.lock()?.insert_report(&report)?;
        debug!(report = %id, message = %report.message_id, "Report stored");
        Ok(())
    }

    async fn touch_last_seen(&self, user: UserId, at: DateTime<Utc>) -> Result<(), BackendError> {
        self.lock()?.touch_last_seen(user, at)?;
        Ok(())
    }

    async fn fetch_last_seen(&self, user: UserId) -> Result<Option<DateTime<Utc>>, BackendError> {
        Ok(self.lock()?.get_last_seen(user)?)
    }
}

impl LocalPrefs for SqliteStore {
    fn hidden_messages(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<Vec<MessageId>, BackendError> {
        Ok(self.lock()?.get_hidden_messages(conversation, user)?)
    }

    fn hide_message(
        &self,
        conversation: ConversationId,
        user: UserId,
        message: MessageId,
    ) -> Result<(), BackendError> {
        Ok(self.lock()?.hide_message(conversation, user, message)?)
    }
}
