//! In-process push infrastructure.
//!
//! [`LocalHub`] implements [`PushTransport`] for a single process: row
//! changes published through its [`ChangeSink`] side fan out to matching row
//! subscriptions, and presence topics keep a roster that is announced to
//! every subscriber as `join` / `leave` deltas followed by a full `sync`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use kindred_shared::{ChangeSink, RawEvent, RowChange};

use crate::error::ChannelError;
use crate::transport::{
    ChannelStatus, PushTransport, Subscription, SubscriptionId, SubscriptionKind,
    SubscriptionSpec, TransportEvent,
};

struct HubSubscription {
    spec: SubscriptionSpec,
    tx: mpsc::UnboundedSender<TransportEvent>,
    acknowledged: bool,
}

/// topic -> roster key -> (subscription, tracked payload)
type Rosters = HashMap<String, BTreeMap<String, Vec<(SubscriptionId, Value)>>>;

#[derive(Default)]
struct HubState {
    next_id: u64,
    subscriptions: HashMap<SubscriptionId, HubSubscription>,
    rosters: Rosters,
    withhold_acks: bool,
    track_calls: u64,
}

/// Shared, cloneable in-memory push hub.
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// While set, new subscriptions are never acknowledged.
    pub fn withhold_acknowledgements(&self, withhold: bool) {
        self.lock().withhold_acks = withhold;
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .subscriptions
            .values()
            .filter(|s| s.spec.topic == topic)
            .count()
    }

    /// Keys currently present in the roster of `topic`.
    pub fn roster_keys(&self, topic: &str) -> Vec<String> {
        self.lock()
            .rosters
            .get(topic)
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// How many `track` calls reached the hub, accepted or not.
    pub fn track_calls(&self) -> u64 {
        self.lock().track_calls
    }

    /// Drop every subscription without notice, as a lost connection would.
    pub fn drop_connections(&self) {
        let mut state = self.lock();
        let dropped = state.subscriptions.len();
        state.subscriptions.clear();
        state.rosters.clear();
        warn!(dropped, "Hub dropped all connections");
    }
}

fn deliver(id: SubscriptionId, sub: &HubSubscription, event: TransportEvent) {
    // Fails only once the receiving side is gone.
    if sub.tx.send(event).is_err() {
        debug!(subscription = %id, topic = %sub.spec.topic, "Subscriber gone, event discarded");
    }
}

fn sync_frame(roster: Option<&BTreeMap<String, Vec<(SubscriptionId, Value)>>>) -> RawEvent {
    let mut state = Map::new();
    for (key, entries) in roster.into_iter().flatten() {
        let metas = entries.iter().map(|(_, payload)| payload.clone()).collect();
        state.insert(key.clone(), Value::Array(metas));
    }
    RawEvent::Presence {
        event: "sync".to_string(),
        key: None,
        payload: Value::Null,
        state,
    }
}

/// Send `events` (in order) to every acknowledged subscriber of `topic`.
fn fan_out(state: &HubState, topic: &str, events: &[RawEvent]) {
    for (id, sub) in &state.subscriptions {
        if sub.spec.topic == topic && sub.acknowledged {
            for event in events {
                deliver(*id, sub, TransportEvent::Event(event.clone()));
            }
        }
    }
}

#[async_trait]
impl PushTransport for LocalHub {
    async fn subscribe(&self, spec: SubscriptionSpec) -> Result<Subscription, ChannelError> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);

        let (tx, rx) = mpsc::unbounded_channel();
        let acknowledged = !state.withhold_acks;
        let sub = HubSubscription {
            spec,
            tx,
            acknowledged,
        };

        if acknowledged {
            deliver(id, &sub, TransportEvent::Status(ChannelStatus::Subscribed));
            if matches!(sub.spec.kind, SubscriptionKind::Presence { .. }) {
                let frame = sync_frame(state.rosters.get(&sub.spec.topic));
                deliver(id, &sub, TransportEvent::Event(frame));
            }
        }

        info!(subscription = %id, topic = %sub.spec.topic, acknowledged, "Hub subscription opened");
        state.subscriptions.insert(id, sub);

        Ok(Subscription { id, events: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChannelError> {
        let mut state = self.lock();
        let sub = state
            .subscriptions
            .remove(&id)
            .ok_or(ChannelError::UnknownSubscription(id.0))?;

        debug!(subscription = %id, topic = %sub.spec.topic, "Hub subscription closed");

        let SubscriptionKind::Presence { .. } = sub.spec.kind else {
            return Ok(());
        };

        let topic = sub.spec.topic;
        let mut left = Vec::new();
        if let Some(roster) = state.rosters.get_mut(&topic) {
            roster.retain(|key, entries| {
                entries.retain(|(owner, _)| *owner != id);
                if entries.is_empty() {
                    left.push(key.clone());
                    false
                } else {
                    true
                }
            });
        }

        if !left.is_empty() {
            let mut events: Vec<RawEvent> = left
                .into_iter()
                .map(|key| RawEvent::Presence {
                    event: "leave".to_string(),
                    key: Some(key),
                    payload: Value::Null,
                    state: Map::new(),
                })
                .collect();
            events.push(sync_frame(state.rosters.get(&topic)));
            fan_out(&state, &topic, &events);
        }

        Ok(())
    }

    async fn track(&self, id: SubscriptionId, payload: Value) -> Result<(), ChannelError> {
        let mut state = self.lock();
        state.track_calls += 1;

        let sub = state
            .subscriptions
            .get(&id)
            .ok_or(ChannelError::UnknownSubscription(id.0))?;
        if !sub.acknowledged {
            return Err(ChannelError::NotSubscribed);
        }
        let SubscriptionKind::Presence { key } = &sub.spec.kind else {
            return Err(ChannelError::NotPresenceChannel);
        };
        let key = key.to_string();
        let topic = sub.spec.topic.clone();

        let entries = state
            .rosters
            .entry(topic.clone())
            .or_default()
            .entry(key.clone())
            .or_default();
        match entries.iter_mut().find(|(owner, _)| *owner == id) {
            Some(entry) => entry.1 = payload.clone(),
            None => entries.push((id, payload.clone())),
        }

        let events = [
            RawEvent::Presence {
                event: "join".to_string(),
                key: Some(key),
                payload,
                state: Map::new(),
            },
            sync_frame(state.rosters.get(&topic)),
        ];
        fan_out(&state, &topic, &events);

        Ok(())
    }
}

impl ChangeSink for LocalHub {
    fn publish(&self, change: RowChange) {
        let Some(conversation) = change.conversation_id() else {
            warn!(table = %change.table, "Row change without conversation, not routed");
            return;
        };

        let state = self.lock();
        let mut delivered = 0usize;
        for (id, sub) in &state.subscriptions {
            let SubscriptionKind::Rows {
                table,
                conversation: filter,
            } = &sub.spec.kind
            else {
                continue;
            };
            if sub.acknowledged && *table == change.table && *filter == conversation {
                deliver(*id, sub, TransportEvent::Event(RawEvent::Row(change.clone())));
                delivered += 1;
            }
        }

        debug!(
            table = %change.table,
            event = %change.event_type,
            conversation = %conversation,
            delivered,
            "Row change routed"
        );
    }
}

#[cfg(test)]
mod tests {
    use kindred_shared::constants::TABLE_MESSAGES;
    use kindred_shared::{ChannelKey, ConversationId, UserId};

    use super::*;

    fn presence_spec(user: UserId) -> SubscriptionSpec {
        SubscriptionSpec::for_key(&ChannelKey::global_presence(), user).unwrap()
    }

    async fn next_event(sub: &mut Subscription) -> TransportEvent {
        sub.events.recv().await.expect("subscription closed")
    }

    #[tokio::test]
    async fn test_subscribe_is_acknowledged_first() {
        let hub = LocalHub::new();
        let conv = ConversationId::new();
        let spec = SubscriptionSpec::for_key(&ChannelKey::messages(conv), UserId::new()).unwrap();
        let mut sub = hub.subscribe(spec).await.unwrap();

        assert_eq!(
            next_event(&mut sub).await,
            TransportEvent::Status(ChannelStatus::Subscribed)
        );
        assert_eq!(hub.subscriber_count(&format!("chat:{conv}")), 1);
    }

    #[tokio::test]
    async fn test_rows_are_filtered_by_conversation() {
        let hub = LocalHub::new();
        let conv = ConversationId::new();
        let spec = SubscriptionSpec::for_key(&ChannelKey::messages(conv), UserId::new()).unwrap();
        let mut sub = hub.subscribe(spec).await.unwrap();
        next_event(&mut sub).await;

        let other = RowChange {
            table: TABLE_MESSAGES.into(),
            event_type: "INSERT".into(),
            new: serde_json::json!({"match_id": ConversationId::new().to_string()}),
            old: Value::Null,
        };
        hub.publish(other);

        let ours = RowChange {
            table: TABLE_MESSAGES.into(),
            event_type: "INSERT".into(),
            new: serde_json::json!({"match_id": conv.to_string()}),
            old: Value::Null,
        };
        hub.publish(ours.clone());

        assert_eq!(
            next_event(&mut sub).await,
            TransportEvent::Event(RawEvent::Row(ours))
        );
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_row_burst_is_not_dropped() {
        let hub = LocalHub::new();
        let conv = ConversationId::new();
        let spec = SubscriptionSpec::for_key(&ChannelKey::messages(conv), UserId::new()).unwrap();
        let mut sub = hub.subscribe(spec).await.unwrap();
        next_event(&mut sub).await;

        for i in 0..1_000 {
            hub.publish(RowChange {
                table: TABLE_MESSAGES.into(),
                event_type: "INSERT".into(),
                new: serde_json::json!({"match_id": conv.to_string(), "n": i}),
                old: Value::Null,
            });
        }

        let mut received = 0;
        while sub.events.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 1_000);
    }

    #[tokio::test]
    async fn test_track_requires_acknowledgement() {
        let hub = LocalHub::new();
        hub.withhold_acknowledgements(true);
        let sub = hub.subscribe(presence_spec(UserId::new())).await.unwrap();

        let err = hub.track(sub.id, Value::Null).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotSubscribed));
        assert!(hub.roster_keys("presence:global").is_empty());
        assert_eq!(hub.track_calls(), 1);
    }

    #[tokio::test]
    async fn test_track_and_leave_reach_other_subscribers() {
        let hub = LocalHub::new();
        let alice = UserId::new();
        let bob = UserId::new();

        let mut watcher = hub.subscribe(presence_spec(alice)).await.unwrap();
        next_event(&mut watcher).await; // ack
        next_event(&mut watcher).await; // initial sync

        let bob_sub = hub.subscribe(presence_spec(bob)).await.unwrap();
        hub.track(bob_sub.id, serde_json::json!({"user_id": bob.to_string()}))
            .await
            .unwrap();

        match next_event(&mut watcher).await {
            TransportEvent::Event(RawEvent::Presence { event, key, .. }) => {
                assert_eq!(event, "join");
                assert_eq!(key, Some(bob.to_string()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match next_event(&mut watcher).await {
            TransportEvent::Event(RawEvent::Presence { event, state, .. }) => {
                assert_eq!(event, "sync");
                assert!(state.contains_key(&bob.to_string()));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        hub.unsubscribe(bob_sub.id).await.unwrap();
        match next_event(&mut watcher).await {
            TransportEvent::Event(RawEvent::Presence { event, key, .. }) => {
                assert_eq!(event, "leave");
                assert_eq!(key, Some(bob.to_string()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(hub.roster_keys("presence:global").is_empty());
    }

    #[tokio::test]
    async fn test_drop_connections_ends_streams() {
        let hub = LocalHub::new();
        let mut sub = hub.subscribe(presence_spec(UserId::new())).await.unwrap();
        next_event(&mut sub).await;
        next_event(&mut sub).await;

        hub.drop_connections();
        assert!(sub.events.recv().await.is_none());
        assert!(matches!(
            hub.unsubscribe(sub.id).await,
            Err(ChannelError::UnknownSubscription(_))
        ));
    }
}
