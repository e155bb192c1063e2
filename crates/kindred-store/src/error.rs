use kindred_shared::BackendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("No platform data directory for the message store")]
    NoDataDir,

    #[error("Store directory: {0}")]
    Io(#[from] std::io::Error),

    /// A row that was just written could not be read back.
    #[error("Row not found")]
    NotFound,

    #[error("Migration failed: {0}")]
    Migration(String),

    /// A task panicked while holding the connection.
    #[error("Store connection poisoned")]
    LockPoisoned,
}

impl From<StoreError> for BackendError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => BackendError::Decode(e.to_string()),
            other => BackendError::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
