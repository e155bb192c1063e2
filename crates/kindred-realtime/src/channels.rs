//! Channel lifecycle management.
//!
//! [`ChannelManager`] owns at most one live transport subscription per
//! [`ChannelKey`]. Each subscription gets a pump task that parses raw payloads
//! into [`PushEvent`]s and fans them out on a broadcast channel; handles are
//! cheap receivers on that broadcast.
//!
//! Closing is synchronous from the caller's point of view: the entry is
//! removed under the lock (so the unsubscribe can only ever be issued once)
//! and the transport call itself is detached onto the runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use kindred_shared::constants::CHANNEL_QUEUE_CAPACITY;
use kindred_shared::{ChannelKey, ConversationId, PushEvent, UserId};

use crate::error::ChannelError;
use crate::transport::{ChannelStatus, PushTransport, SubscriptionId, SubscriptionSpec, TransportEvent};

struct ActiveChannel {
    id: SubscriptionId,
    /// Never read; new handles resubscribe from it. The pump owns the only
    /// sender so handles see `None` once the stream ends.
    events: broadcast::Receiver<PushEvent>,
    status: watch::Receiver<ChannelStatus>,
    pump: JoinHandle<()>,
    runtime: Handle,
}

type OpenGate = Arc<tokio::sync::Mutex<()>>;

pub struct ChannelManager {
    transport: Arc<dyn PushTransport>,
    me: UserId,
    active: Mutex<HashMap<ChannelKey, ActiveChannel>>,
    /// One gate per key being opened, so two callers cannot both subscribe
    /// the same key while a slow subscribe never holds up other keys.
    opening: Mutex<HashMap<ChannelKey, OpenGate>>,
}

impl ChannelManager {
    pub fn new(transport: Arc<dyn PushTransport>, me: UserId) -> Self {
        Self {
            transport,
            me,
            active: Mutex::new(HashMap::new()),
            opening: Mutex::new(HashMap::new()),
        }
    }

    /// The participant this manager subscribes on behalf of.
    pub fn local_user(&self) -> UserId {
        self.me
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelKey, ActiveChannel>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return a handle on the live subscription for `key`, subscribing first
    /// if there is none. A subscription whose stream has ended (dropped
    /// connection) is replaced.
    pub async fn open(&self, key: ChannelKey) -> Result<ChannelHandle, ChannelError> {
        let gate = self
            .opening
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key)
            .or_default()
            .clone();

        let opened = {
            let _held = gate.lock().await;
            self.open_gated(key).await
        };

        let mut opening = self.opening.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map and this call still hold the gate: nobody is waiting.
        if Arc::strong_count(&gate) == 2 {
            opening.remove(&key);
        }
        opened
    }

    async fn open_gated(&self, key: ChannelKey) -> Result<ChannelHandle, ChannelError> {
        {
            let mut active = self.lock();
            match active.get(&key) {
                Some(ch) if !ch.pump.is_finished() => {
                    debug!(topic = %key, subscription = %ch.id, "Reusing live channel");
                    return Ok(ChannelHandle {
                        key,
                        id: ch.id,
                        events: ch.events.resubscribe(),
                        status: ch.status.clone(),
                        transport: self.transport.clone(),
                    });
                }
                Some(_) => {
                    debug!(topic = %key, "Replacing ended channel");
                    active.remove(&key);
                }
                None => {}
            }
        }

        let spec = SubscriptionSpec::for_key(&key, self.me)
            .ok_or_else(|| ChannelError::InvalidKey(key.to_topic()))?;
        let subscription = self.transport.subscribe(spec).await?;

        let (events_tx, events_rx) = broadcast::channel(CHANNEL_QUEUE_CAPACITY);
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Pending);
        let pump = tokio::spawn(pump_events(key, subscription.events, events_tx, status_tx));

        self.lock().insert(
            key,
            ActiveChannel {
                id: subscription.id,
                events: events_rx.resubscribe(),
                status: status_rx.clone(),
                pump,
                runtime: Handle::current(),
            },
        );

        info!(topic = %key, subscription = %subscription.id, "Channel opened");

        Ok(ChannelHandle {
            key,
            id: subscription.id,
            events: events_rx,
            status: status_rx,
            transport: self.transport.clone(),
        })
    }

    /// Tear down the subscription for `key`. Returns immediately; the
    /// transport unsubscribe runs detached. Returns `false` if nothing was
    /// open.
    pub fn close(&self, key: &ChannelKey) -> bool {
        let Some(channel) = self.lock().remove(key) else {
            return false;
        };
        self.detach_unsubscribe(*key, channel);
        true
    }

    /// Close the message and typing channels (and any other) of one
    /// conversation.
    pub fn close_conversation(&self, conversation: ConversationId) -> usize {
        let closing: Vec<(ChannelKey, ActiveChannel)> = {
            let mut active = self.lock();
            let keys: Vec<ChannelKey> = active
                .keys()
                .filter(|k| k.conversation == Some(conversation))
                .copied()
                .collect();
            keys.into_iter()
                .filter_map(|k| active.remove(&k).map(|ch| (k, ch)))
                .collect()
        };

        let count = closing.len();
        for (key, channel) in closing {
            self.detach_unsubscribe(key, channel);
        }
        count
    }

    pub fn close_all(&self) -> usize {
        let closing: Vec<(ChannelKey, ActiveChannel)> = self.lock().drain().collect();
        let count = closing.len();
        for (key, channel) in closing {
            self.detach_unsubscribe(key, channel);
        }
        count
    }

    pub fn is_active(&self, key: &ChannelKey) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|ch| !ch.pump.is_finished())
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn detach_unsubscribe(&self, key: ChannelKey, channel: ActiveChannel) {
        // No further events reach handles once the entry is gone.
        channel.pump.abort();

        let transport = self.transport.clone();
        let id = channel.id;
        channel.runtime.spawn(async move {
            match transport.unsubscribe(id).await {
                Ok(()) => debug!(topic = %key, subscription = %id, "Unsubscribed"),
                Err(e) => debug!(topic = %key, subscription = %id, error = %e, "Unsubscribe failed"),
            }
        });

        info!(topic = %key, subscription = %id, "Channel closed");
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

async fn pump_events(
    key: ChannelKey,
    mut rx: mpsc::UnboundedReceiver<TransportEvent>,
    events: broadcast::Sender<PushEvent>,
    status: watch::Sender<ChannelStatus>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            TransportEvent::Status(s) => {
                debug!(topic = %key, status = ?s, "Channel status");
                status.send_replace(s);
            }
            TransportEvent::Event(raw) => match PushEvent::parse(raw) {
                // No receivers simply means nobody is listening right now.
                Ok(event) => {
                    let _ = events.send(event);
                }
                Err(e) => warn!(topic = %key, error = %e, "Rejected push payload"),
            },
        }
    }

    warn!(topic = %key, "Channel stream ended");
    status.send_replace(ChannelStatus::Closed);
}

/// What a consumer reads off a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Push(PushEvent),
    /// The consumer fell behind and `skipped` events were lost to it. State
    /// derived from the stream must be rebuilt from the backend.
    Resync { skipped: u64 },
}

/// A consumer's view of one live channel.
pub struct ChannelHandle {
    key: ChannelKey,
    id: SubscriptionId,
    events: broadcast::Receiver<PushEvent>,
    status: watch::Receiver<ChannelStatus>,
    transport: Arc<dyn PushTransport>,
}

impl ChannelHandle {
    pub fn key(&self) -> ChannelKey {
        self.key
    }

    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    pub fn is_subscribed(&self) -> bool {
        *self.status.borrow() == ChannelStatus::Subscribed
    }

    /// Independent watcher on the subscription status.
    pub fn status_watch(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Next event or gap, or `None` once the channel is closed.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        match self.events.recv().await {
            Ok(event) => Some(ChannelEvent::Push(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(topic = %self.key, skipped, "Channel consumer lagged");
                Some(ChannelEvent::Resync { skipped })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Next parsed event, stepping over gaps. For consumers whose state
    /// heals on its own (full roster syncs, typing max-age).
    pub async fn recv(&mut self) -> Option<PushEvent> {
        loop {
            match self.next().await? {
                ChannelEvent::Push(event) => return Some(event),
                ChannelEvent::Resync { .. } => {}
            }
        }
    }

    /// Wait for the transport to acknowledge the subscription.
    pub async fn wait_subscribed(&self) -> Result<(), ChannelError> {
        let mut status = self.status.clone();
        loop {
            match &*status.borrow_and_update() {
                ChannelStatus::Subscribed => return Ok(()),
                ChannelStatus::Pending => {}
                ChannelStatus::Closed => return Err(ChannelError::Closed),
                other => return Err(ChannelError::SubscribeFailed(format!("{other:?}"))),
            }
            if status.changed().await.is_err() {
                return Err(ChannelError::Closed);
            }
        }
    }

    /// Announce `payload` into the presence roster. Refused until the
    /// subscription is acknowledged.
    pub async fn track<T: Serialize>(&self, payload: &T) -> Result<(), ChannelError> {
        if !self.is_subscribed() {
            return Err(ChannelError::NotSubscribed);
        }
        let value = serde_json::to_value(payload)?;
        self.transport.track(self.id, value).await
    }
}
