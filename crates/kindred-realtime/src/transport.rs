//! Push channel transport contract.
//!
//! A transport hands out subscriptions whose events arrive on an unbounded
//! tokio mpsc receiver: delivery is at-least-once and a transport never
//! drops an event because the consumer is slow. Status changes
//! (acknowledgement, errors) travel on the same queue as payloads so their
//! relative order is preserved.

use async_trait::async_trait;
use tokio::sync::mpsc;

use kindred_shared::constants::{TABLE_MESSAGES, TABLE_TYPING};
use kindred_shared::{ChannelKey, ChannelPurpose, ConversationId, RawEvent, UserId};

use crate::error::ChannelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// Row changes of one table, filtered to one conversation.
    Rows {
        table: String,
        conversation: ConversationId,
    },
    /// Presence roster; `key` is the roster key this client tracks under.
    Presence { key: UserId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub topic: String,
    pub kind: SubscriptionKind,
}

impl SubscriptionSpec {
    /// Build the subscription for a logical channel key. Row channels need a
    /// conversation; `None` is returned when the key has none.
    pub fn for_key(key: &ChannelKey, me: UserId) -> Option<Self> {
        let kind = match key.purpose {
            ChannelPurpose::Messages => SubscriptionKind::Rows {
                table: TABLE_MESSAGES.to_string(),
                conversation: key.conversation?,
            },
            ChannelPurpose::Typing => SubscriptionKind::Rows {
                table: TABLE_TYPING.to_string(),
                conversation: key.conversation?,
            },
            ChannelPurpose::Presence => SubscriptionKind::Presence { key: me },
        };
        Some(Self {
            topic: key.to_topic(),
            kind,
        })
    }
}

/// Lifecycle of a subscription as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Requested, not yet acknowledged.
    Pending,
    Subscribed,
    Errored(String),
    TimedOut,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Status(ChannelStatus),
    Event(RawEvent),
}

pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn subscribe(&self, spec: SubscriptionSpec) -> Result<Subscription, ChannelError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChannelError>;

    /// Announce a payload into a presence roster. Only valid once the
    /// subscription has been acknowledged.
    async fn track(&self, id: SubscriptionId, payload: serde_json::Value)
        -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_for_keys() {
        let conv = ConversationId::new();
        let me = UserId::new();

        let spec = SubscriptionSpec::for_key(&ChannelKey::typing(conv), me).unwrap();
        assert_eq!(spec.topic, format!("typing:{conv}"));
        assert_eq!(
            spec.kind,
            SubscriptionKind::Rows {
                table: "typing_status".into(),
                conversation: conv
            }
        );

        let spec = SubscriptionSpec::for_key(&ChannelKey::global_presence(), me).unwrap();
        assert_eq!(spec.kind, SubscriptionKind::Presence { key: me });
    }

    #[test]
    fn test_row_key_without_conversation() {
        let key = ChannelKey {
            purpose: ChannelPurpose::Messages,
            conversation: None,
        };
        assert!(SubscriptionSpec::for_key(&key, UserId::new()).is_none());
    }
}
