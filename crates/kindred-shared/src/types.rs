use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::GLOBAL_PRESENCE_TOPIC;

// Participant identity = the auth provider's user UUID
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A conversation between two matched participants. Handed to the client by
/// the discovery flow; the client never mints one itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a push channel subscription is for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChannelPurpose {
    Messages,
    Typing,
    Presence,
}

/// Logical identity of one push channel subscription: at most one live
/// subscription exists per key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub purpose: ChannelPurpose,
    /// `None` only for the app-wide presence channel.
    pub conversation: Option<ConversationId>,
}

impl ChannelKey {
    pub fn messages(conversation: ConversationId) -> Self {
        Self {
            purpose: ChannelPurpose::Messages,
            conversation: Some(conversation),
        }
    }

    pub fn typing(conversation: ConversationId) -> Self {
        Self {
            purpose: ChannelPurpose::Typing,
            conversation: Some(conversation),
        }
    }

    pub fn global_presence() -> Self {
        Self {
            purpose: ChannelPurpose::Presence,
            conversation: None,
        }
    }

    pub fn to_topic(&self) -> String {
        match (self.purpose, self.conversation) {
            (ChannelPurpose::Messages, Some(c)) => format!("chat:{c}"),
            (ChannelPurpose::Typing, Some(c)) => format!("typing:{c}"),
            (ChannelPurpose::Presence, Some(c)) => format!("presence:{c}"),
            (ChannelPurpose::Presence, None) => GLOBAL_PRESENCE_TOPIC.to_string(),
            (purpose, None) => format!("{purpose:?}:none").to_lowercase(),
        }
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_topic())
    }
}
