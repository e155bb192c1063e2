use thiserror::Error;

use kindred_realtime::ChannelError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("No signed-in user")]
    NoSession,

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Clipboard unavailable: {0}")]
    Clipboard(String),
}
