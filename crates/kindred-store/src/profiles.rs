use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use kindred_shared::UserId;

use crate::database::{ts_from_sql, ts_to_sql, Database};
use crate::error::Result;

impl Database {
    /// Record activity for `user`. The stored value only ever moves forward,
    /// so a delayed write from an older heartbeat cannot rewind it.
    pub fn touch_last_seen(&self, user: UserId, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO profiles (id, last_seen_at) VALUES (?1, ?2)
             ON CONFLICT (id) DO UPDATE SET last_seen_at = excluded.last_seen_at
             WHERE profiles.last_seen_at IS NULL
                OR profiles.last_seen_at < excluded.last_seen_at",
            params![user.to_string(), ts_to_sql(&at)],
        )?;
        Ok(())
    }

    pub fn get_last_seen(&self, user: UserId) -> Result<Option<DateTime<Utc>>> {
        let value: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT last_seen_at FROM profiles WHERE id = ?1",
                params![user.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match value.flatten() {
            Some(s) => Ok(Some(ts_from_sql(0, &s)?)),
            None => Ok(None),
        }
    }
}
