use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("No subscription can be built for channel {0}")]
    InvalidKey(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Channel has not acknowledged the subscription")]
    NotSubscribed,

    #[error("Channel closed")]
    Closed,

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(u64),

    #[error("Not a presence channel")]
    NotPresenceChannel,

    #[error("Payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
