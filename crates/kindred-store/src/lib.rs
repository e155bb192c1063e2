//! # kindred-store
//!
//! SQLite-backed reference backend for Kindred.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` with typed CRUD helpers, and [`SqliteStore`], which
//! puts that handle behind the async `DataStore` / `LocalPrefs` contracts and
//! forwards every committed row change to an optional `ChangeSink`.

pub mod backend;
pub mod database;
pub mod hidden;
pub mod messages;
pub mod migrations;
pub mod profiles;
pub mod reports;
pub mod typing;

mod error;

pub use backend::SqliteStore;
pub use database::Database;
pub use error::StoreError;
