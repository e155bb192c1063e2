// Realtime synchronization core: push channels, presence, message
// reconciliation and typing indicators.

pub mod channels;
pub mod heartbeat;
pub mod hub;
pub mod presence;
pub mod presence_service;
pub mod reconciler;
pub mod transport;
pub mod typing;

mod error;

pub use channels::{ChannelEvent, ChannelHandle, ChannelManager};
pub use error::ChannelError;
pub use heartbeat::Heartbeat;
pub use hub::LocalHub;
pub use presence::{PresenceDisplay, PresenceSnapshot, PresenceTracker, SyncState};
pub use presence_service::{PresenceConfig, PresenceService};
pub use reconciler::{
    DeleteOutcome, MessageLog, MessageReconciler, ReportOutcome, SendOutcome, SendRejection,
};
pub use transport::{
    ChannelStatus, PushTransport, Subscription, SubscriptionId, SubscriptionKind,
    SubscriptionSpec, TransportEvent,
};
pub use typing::{spawn_typing_watch, DebounceTimer, TypingBroadcaster, TypingMonitor};
