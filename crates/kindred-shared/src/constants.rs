use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Kindred";

/// Topic of the single app-wide presence channel
pub const GLOBAL_PRESENCE_TOPIC: &str = "presence:global";

/// Backend table names as they appear in row-change events
pub const TABLE_MESSAGES: &str = "messages";
pub const TABLE_TYPING: &str = "typing_status";

/// Quiet period after the last keystroke before "typing = false" is sent.
/// The receiving side uses twice this value as its max-age fallback.
pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(2_500);

/// Last-seen heartbeat period
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Lifetime of transient status text
pub const STATUS_TTL_SUCCESS: Duration = Duration::from_millis(900);
pub const STATUS_TTL_FAILURE: Duration = Duration::from_millis(1_500);
pub const STATUS_TTL_NO_EFFECT: Duration = Duration::from_millis(2_500);

/// Rendered in place of a tombstoned message body
pub const DELETED_PLACEHOLDER: &str = "Message deleted";

/// Reason attached to reports filed from the message menu
pub const DEFAULT_REPORT_REASON: &str = "User reported message";

/// Capacity of per-subscription event queues
pub const CHANNEL_QUEUE_CAPACITY: usize = 256;

/// Maximum message body length in bytes (16 KiB)
pub const MAX_BODY_LEN: usize = 16 * 1024;
