//! Domain rows exchanged with the Remote Data Store and carried inside push
//! events.
//!
//! Field names follow the backend's column names so a row-change payload
//! deserializes directly into these structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DELETED_PLACEHOLDER;
use crate::types::{ConversationId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Backend-assigned, stable identifier.
    pub id: MessageId,
    /// The conversation (match) this message belongs to.
    #[serde(rename = "match_id")]
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    /// Soft-delete tombstone. When set the body is hidden, never erased.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Text to render: the body, or the placeholder once tombstoned.
    pub fn display_body(&self) -> &str {
        if self.is_deleted() {
            DELETED_PLACEHOLDER
        } else {
            &self.body
        }
    }
}

/// Insert payload for a new message. Id and timestamp come from the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    #[serde(rename = "match_id")]
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Typing
// ---------------------------------------------------------------------------

/// One row per (conversation, participant), upserted on every broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingRow {
    #[serde(rename = "match_id")]
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Payload a participant tracks into the presence roster. Diagnostic only;
/// membership is decided by the roster key alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresencePayload {
    pub user_id: UserId,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewReport {
    #[serde(rename = "match_id")]
    pub conversation_id: ConversationId,
    pub reporter_id: UserId,
    pub reported_user_id: UserId,
    pub message_id: MessageId,
    pub reason: String,
}
