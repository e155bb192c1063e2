use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use kindred_shared::{MessageId, NewReport};

use crate::database::{ts_to_sql, Database};
use crate::error::Result;

impl Database {
    pub fn insert_report(&self, report: &NewReport) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO reports
                (id, match_id, reporter_id, reported_user_id, message_id, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                report.conversation_id.to_string(),
                report.reporter_id.to_string(),
                report.reported_user_id.to_string(),
                report.message_id.to_string(),
                report.reason,
                ts_to_sql(&Utc::now()),
            ],
        )?;
        Ok(id)
    }

    pub fn count_reports_for_message(&self, message: MessageId) -> Result<u32> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM reports WHERE message_id = ?1",
            params![message.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
