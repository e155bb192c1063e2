use rusqlite::params;

use kindred_shared::{ConversationId, TypingRow, UserId};

use crate::database::{ts_from_sql, ts_to_sql, uuid_from_sql, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Upsert a participant's typing row. Returns `true` when the row was
    /// created, `false` when an existing one was overwritten.
    pub fn upsert_typing(&self, row: &TypingRow) -> Result<bool> {
        let existed: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM typing_status WHERE match_id = ?1 AND user_id = ?2)",
            params![row.conversation_id.to_string(), row.user_id.to_string()],
            |r| r.get(0),
        )?;

        self.conn().execute(
            "INSERT INTO typing_status (match_id, user_id, is_typing, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (match_id, user_id)
             DO UPDATE SET is_typing = excluded.is_typing, updated_at = excluded.updated_at",
            params![
                row.conversation_id.to_string(),
                row.user_id.to_string(),
                row.is_typing,
                ts_to_sql(&row.updated_at),
            ],
        )?;

        Ok(!existed)
    }

    pub fn get_typing(&self, conversation: ConversationId, user: UserId) -> Result<TypingRow> {
        self.conn()
            .query_row(
                "SELECT match_id, user_id, is_typing, updated_at
                 FROM typing_status WHERE match_id = ?1 AND user_id = ?2",
                params![conversation.to_string(), user.to_string()],
                |row| {
                    let match_str: String = row.get(0)?;
                    let user_str: String = row.get(1)?;
                    let updated_str: String = row.get(3)?;
                    Ok(TypingRow {
                        conversation_id: ConversationId(uuid_from_sql(0, &match_str)?),
                        user_id: UserId(uuid_from_sql(1, &user_str)?),
                        is_typing: row.get(2)?,
                        updated_at: ts_from_sql(3, &updated_str)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}
