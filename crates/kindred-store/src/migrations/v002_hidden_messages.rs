//! v002 -- Per-user "delete for me" list.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS hidden_messages (
    match_id   TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    message_id TEXT NOT NULL,
    hidden_at  TEXT NOT NULL,

    PRIMARY KEY (match_id, user_id, message_id)
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
