//! Push channel payloads.
//!
//! The transport delivers loosely shaped JSON ([`RawEvent`]). Nothing past the
//! channel boundary sees that shape: every payload is parsed into the closed
//! [`PushEvent`] type, and anything that does not fit is rejected with a
//! [`ProtocolError`] for the caller to log and drop.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{TABLE_MESSAGES, TABLE_TYPING};
use crate::error::ProtocolError;
use crate::models::{Message, PresencePayload, TypingRow};
use crate::types::{ConversationId, UserId};

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// A row-change notification as the backend emits it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowChange {
    pub table: String,
    /// `INSERT`, `UPDATE` or `DELETE`.
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub new: Value,
    #[serde(default)]
    pub old: Value,
}

impl RowChange {
    pub fn insert<T: Serialize>(table: &str, row: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            table: table.to_string(),
            event_type: "INSERT".to_string(),
            new: serde_json::to_value(row)?,
            old: Value::Object(Map::new()),
        })
    }

    pub fn update<T: Serialize>(table: &str, row: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            table: table.to_string(),
            event_type: "UPDATE".to_string(),
            new: serde_json::to_value(row)?,
            old: Value::Object(Map::new()),
        })
    }

    /// Conversation the changed row belongs to, read from `match_id` on the new
    /// image first and the old image second.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        [&self.new, &self.old]
            .into_iter()
            .find_map(|image| image.get("match_id")?.as_str())
            .and_then(|s| ConversationId::parse(s).ok())
    }
}

/// Everything a push subscription can carry before parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawEvent {
    Row(RowChange),
    Presence {
        /// `sync`, `join` or `leave`.
        event: String,
        #[serde(default)]
        key: Option<String>,
        #[serde(default)]
        payload: Value,
        /// Full roster for `sync`: key -> tracked payloads.
        #[serde(default)]
        state: Map<String, Value>,
    },
}

// ---------------------------------------------------------------------------
// Parsed events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RowEvent<T> {
    Insert(T),
    Update(T),
    /// Physical removal; only the old image is available.
    Delete(Value),
}

/// Roster snapshot: participant -> payloads tracked under that key.
pub type Roster = BTreeMap<UserId, Vec<PresencePayload>>;

#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    Sync(Roster),
    Join {
        key: UserId,
        payload: Option<PresencePayload>,
    },
    Leave {
        key: UserId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Message(RowEvent<Message>),
    Typing(RowEvent<TypingRow>),
    Presence(PresenceEvent),
}

impl PushEvent {
    pub fn parse(raw: RawEvent) -> Result<Self, ProtocolError> {
        match raw {
            RawEvent::Row(change) => match change.table.as_str() {
                TABLE_MESSAGES => Ok(PushEvent::Message(parse_row(change)?)),
                TABLE_TYPING => Ok(PushEvent::Typing(parse_row(change)?)),
                other => Err(ProtocolError::UnknownTable(other.to_string())),
            },
            RawEvent::Presence {
                event,
                key,
                payload,
                state,
            } => parse_presence(&event, key, payload, state).map(PushEvent::Presence),
        }
    }
}

fn parse_row<T: serde::de::DeserializeOwned>(
    change: RowChange,
) -> Result<RowEvent<T>, ProtocolError> {
    let has_row = |v: &Value| v.as_object().is_some_and(|m| !m.is_empty());

    match change.event_type.to_ascii_uppercase().as_str() {
        "INSERT" | "UPDATE" if !has_row(&change.new) => Err(ProtocolError::MissingRow),
        "INSERT" => Ok(RowEvent::Insert(serde_json::from_value(change.new)?)),
        "UPDATE" => Ok(RowEvent::Update(serde_json::from_value(change.new)?)),
        "DELETE" => Ok(RowEvent::Delete(change.old)),
        other => Err(ProtocolError::UnknownEventType(other.to_string())),
    }
}

fn parse_key(key: Option<String>) -> Result<UserId, ProtocolError> {
    let key = key.ok_or_else(|| ProtocolError::InvalidKey("missing".to_string()))?;
    UserId::parse(&key).map_err(|_| ProtocolError::InvalidKey(key))
}

fn parse_presence(
    event: &str,
    key: Option<String>,
    payload: Value,
    state: Map<String, Value>,
) -> Result<PresenceEvent, ProtocolError> {
    match event {
        "sync" => {
            let mut roster = Roster::new();
            for (key, metas) in state {
                let id = parse_key(Some(key))?;
                // Payloads are diagnostic; a malformed one must not cost the key.
                let payloads = match metas {
                    Value::Array(items) => items
                        .into_iter()
                        .filter_map(|item| serde_json::from_value(item).ok())
                        .collect(),
                    _ => Vec::new(),
                };
                roster.insert(id, payloads);
            }
            Ok(PresenceEvent::Sync(roster))
        }
        "join" => Ok(PresenceEvent::Join {
            key: parse_key(key)?,
            payload: serde_json::from_value(payload).ok(),
        }),
        "leave" => Ok(PresenceEvent::Leave {
            key: parse_key(key)?,
        }),
        other => Err(ProtocolError::UnknownPresenceEvent(other.to_string())),
    }
}
