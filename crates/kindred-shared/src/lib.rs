// Types and contracts shared by every Kindred crate.

pub mod backend;
pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use backend::{ChangeSink, DataStore, LocalPrefs, SessionProvider};
pub use error::{BackendError, ProtocolError};
pub use models::{Message, NewMessage, NewReport, PresencePayload, TypingRow};
pub use protocol::{PresenceEvent, PushEvent, RawEvent, Roster, RowChange, RowEvent};
pub use types::{ChannelKey, ChannelPurpose, ConversationId, MessageId, UserId};
