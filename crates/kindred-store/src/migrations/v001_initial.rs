//! v001 -- Initial schema creation.
//!
//! Creates the four backend tables: `profiles`, `messages`, `typing_status`
//! and `reports`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Profiles (only the presence fallback lives here)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    id           TEXT PRIMARY KEY NOT NULL,   -- auth user UUID
    last_seen_at TEXT                         -- RFC-3339, UTC, micros
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4, backend-assigned
    match_id   TEXT NOT NULL,                 -- conversation UUID
    sender_id  TEXT NOT NULL,
    body       TEXT NOT NULL,
    created_at TEXT NOT NULL,
    deleted_at TEXT                           -- soft-delete tombstone
);

CREATE INDEX IF NOT EXISTS idx_messages_match_ts
    ON messages(match_id, created_at ASC);

-- ----------------------------------------------------------------
-- Typing status (one row per conversation participant)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS typing_status (
    match_id   TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    is_typing  INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    updated_at TEXT NOT NULL,

    PRIMARY KEY (match_id, user_id)
);

-- ----------------------------------------------------------------
-- Reports
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reports (
    id               TEXT PRIMARY KEY NOT NULL,
    match_id         TEXT NOT NULL,
    reporter_id      TEXT NOT NULL,
    reported_user_id TEXT NOT NULL,
    message_id       TEXT NOT NULL,
    reason           TEXT NOT NULL,
    created_at       TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
