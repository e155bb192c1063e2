//! Schema migrations, applied in order when a [`Database`] is opened.
//!
//! `PRAGMA user_version` records the last applied step. Each step runs in its
//! own transaction together with the version bump.
//!
//! [`Database`]: crate::Database

pub mod v001_initial;
pub mod v002_hidden_messages;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// Ordered migration steps; step `i` moves the schema to version `i + 1`.
const STEPS: &[(&str, Step)] = &[
    ("v001_initial", v001_initial::up),
    ("v002_hidden_messages", v002_hidden_messages::up),
];

pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current = schema_version(conn)?;
    let target = STEPS.len() as u32;

    if current > target {
        return Err(StoreError::Migration(format!(
            "schema version {current} is newer than this build ({target})"
        )));
    }

    for (version, (name, up)) in (1u32..).zip(STEPS).skip(current as usize) {
        tracing::info!(migration = name, version, "applying migration");
        let tx = conn.unchecked_transaction()?;
        up(&tx).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    Ok(())
}
