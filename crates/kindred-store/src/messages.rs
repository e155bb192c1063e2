use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use kindred_shared::{ConversationId, Message, MessageId, NewMessage, UserId};

use crate::database::{now_stored, ts_from_sql, ts_to_sql, uuid_from_sql, Database};
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, match_id, sender_id, body, created_at, deleted_at";

impl Database {
    /// Insert a new message, assigning its id and creation timestamp.
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        let message = Message {
            id: MessageId::new(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            body: new.body.clone(),
            created_at: now_stored(),
            deleted_at: None,
        };

        self.conn().execute(
            "INSERT INTO messages (id, match_id, sender_id, body, created_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sender_id.to_string(),
                message.body,
                ts_to_sql(&message.created_at),
            ],
        )?;

        Ok(message)
    }

    /// All messages of a conversation, oldest first. Rows sharing a timestamp
    /// keep insertion order.
    pub fn get_messages_for_conversation(&self, conversation: ConversationId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE match_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![conversation.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Tombstone a message, but only when `sender` wrote it.
    ///
    /// Returns `None` when nothing matched. The first tombstone wins: deleting
    /// an already-deleted message matches but keeps the original timestamp.
    pub fn soft_delete_message(
        &self,
        id: MessageId,
        sender: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<Message>> {
        let affected = self.conn().execute(
            "UPDATE messages SET deleted_at = COALESCE(deleted_at, ?3)
             WHERE id = ?1 AND sender_id = ?2",
            params![id.to_string(), sender.to_string(), ts_to_sql(&at)],
        )?;

        if affected == 0 {
            return Ok(None);
        }

        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .optional()
            .map_err(StoreError::from)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let match_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let body: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    let deleted_str: Option<String> = row.get(5)?;

    Ok(Message {
        id: MessageId(uuid_from_sql(0, &id_str)?),
        conversation_id: ConversationId(uuid_from_sql(1, &match_str)?),
        sender_id: UserId(uuid_from_sql(2, &sender_str)?),
        body,
        created_at: ts_from_sql(4, &created_str)?,
        deleted_at: deleted_str.map(|s| ts_from_sql(5, &s)).transpose()?,
    })
}
