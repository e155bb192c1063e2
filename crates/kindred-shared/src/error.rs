use thiserror::Error;

/// Failure of a Remote Data Store call. A call that succeeded but matched no
/// rows is *not* an error; stores report that through `Option`/`bool`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// A push payload that does not fit the closed event type.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Unknown presence event: {0}")]
    UnknownPresenceEvent(String),

    #[error("Event carries no row")]
    MissingRow,

    #[error("Invalid row: {0}")]
    InvalidRow(#[from] serde_json::Error),

    #[error("Invalid presence key: {0}")]
    InvalidKey(String),
}
