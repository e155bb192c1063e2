use chrono::Utc;
use rusqlite::params;

use kindred_shared::{ConversationId, MessageId, UserId};

use crate::database::{ts_to_sql, uuid_from_sql, Database};
use crate::error::Result;

impl Database {
    /// Hide a message from one user's view of a conversation. Idempotent.
    pub fn hide_message(
        &self,
        conversation: ConversationId,
        user: UserId,
        message: MessageId,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO hidden_messages (match_id, user_id, message_id, hidden_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation.to_string(),
                user.to_string(),
                message.to_string(),
                ts_to_sql(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn get_hidden_messages(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id FROM hidden_messages
             WHERE match_id = ?1 AND user_id = ?2
             ORDER BY hidden_at ASC",
        )?;
        let rows = stmt.query_map(params![conversation.to_string(), user.to_string()], |row| {
            let id: String = row.get(0)?;
            Ok(MessageId(uuid_from_sql(0, &id)?))
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_is_per_user_and_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let conv = ConversationId::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let msg = MessageId::new();

        db.hide_message(conv, alice, msg).unwrap();
        db.hide_message(conv, alice, msg).unwrap();

        assert_eq!(db.get_hidden_messages(conv, alice).unwrap(), vec![msg]);
        assert!(db.get_hidden_messages(conv, bob).unwrap().is_empty());
    }
}
