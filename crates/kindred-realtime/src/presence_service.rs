//! App-wide presence: one roster subscription plus the last-seen heartbeat.
//!
//! Started once per signed-in session. The local user is tracked into the
//! roster only after the transport has acknowledged the subscription; a
//! subscription that is never acknowledged never tracks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use kindred_shared::constants::HEARTBEAT_INTERVAL;
use kindred_shared::{ChannelKey, DataStore, PresencePayload, PushEvent, UserId};

use crate::channels::{ChannelHandle, ChannelManager};
use crate::error::ChannelError;
use crate::heartbeat::{self, Heartbeat};
use crate::presence::{PresenceDisplay, PresenceSnapshot, PresenceTracker};
use crate::transport::ChannelStatus;

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub heartbeat_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

pub struct PresenceService {
    me: UserId,
    channels: Arc<ChannelManager>,
    store: Arc<dyn DataStore>,
    snapshot: watch::Receiver<PresenceSnapshot>,
    heartbeat: Mutex<Option<Heartbeat>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceService {
    pub async fn start(
        channels: Arc<ChannelManager>,
        store: Arc<dyn DataStore>,
        config: PresenceConfig,
    ) -> Result<Self, ChannelError> {
        let me = channels.local_user();
        let heartbeat = Heartbeat::spawn(store.clone(), me, config.heartbeat_interval);

        let handle = channels.open(ChannelKey::global_presence()).await?;
        let (snapshot_tx, snapshot_rx) = watch::channel(PresenceSnapshot::default());
        let listener = tokio::spawn(listen(handle, me, snapshot_tx));

        info!(user = %me.short(), "Presence started");

        Ok(Self {
            me,
            channels,
            store,
            snapshot: snapshot_rx,
            heartbeat: Mutex::new(Some(heartbeat)),
            listener: Mutex::new(Some(listener)),
        })
    }

    /// O(1) membership check against the latest roster.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.snapshot.borrow().contains(user)
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that wakes whenever the online set changes.
    pub fn subscribe(&self) -> watch::Receiver<PresenceSnapshot> {
        self.snapshot.clone()
    }

    /// Live roster first, persisted last-seen second. Lookup failures degrade
    /// to `Unknown`.
    pub async fn display(&self, user: UserId) -> PresenceDisplay {
        if self.is_online(&user) {
            return PresenceDisplay::Online;
        }
        match self.store.fetch_last_seen(user).await {
            Ok(last_seen) => PresenceDisplay::resolve(false, last_seen),
            Err(e) => {
                debug!(user = %user.short(), error = %e, "Last-seen lookup failed");
                PresenceDisplay::Unknown
            }
        }
    }

    /// Best-effort last-seen write when the app is backgrounded.
    pub fn page_hidden(&self) {
        if let Some(heartbeat) = self.heartbeat.lock().unwrap_or_else(|p| p.into_inner()).as_ref() {
            heartbeat.touch_now();
        }
    }

    pub fn is_running(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Stop the heartbeat, leave the roster and write last-seen one final
    /// time. Safe to call more than once.
    pub fn shutdown(&self) {
        let beat = self.heartbeat.lock().unwrap_or_else(|p| p.into_inner()).take();
        let listener = self.listener.lock().unwrap_or_else(|p| p.into_inner()).take();
        if beat.is_none() && listener.is_none() {
            return;
        }

        drop(beat);
        if let Some(listener) = listener {
            listener.abort();
        }
        self.channels.close(&ChannelKey::global_presence());

        let store = self.store.clone();
        let me = self.me;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { heartbeat::touch(store.as_ref(), me).await });
        }

        info!(user = %me.short(), "Presence stopped");
    }
}

impl Drop for PresenceService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn listen(mut handle: ChannelHandle, me: UserId, snapshot: watch::Sender<PresenceSnapshot>) {
    let mut tracker = PresenceTracker::new();
    let mut status = handle.status_watch();
    let mut tracked = false;

    loop {
        let acknowledged = *status.borrow_and_update() == ChannelStatus::Subscribed;
        if acknowledged && !tracked {
            let payload = PresencePayload {
                user_id: me,
                at: Utc::now(),
            };
            match handle.track(&payload).await {
                Ok(()) => {
                    tracked = true;
                    debug!(user = %me.short(), "Tracked into presence roster");
                }
                Err(e) => warn!(error = %e, "Presence track failed"),
            }
        }

        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            event = handle.recv() => match event {
                Some(PushEvent::Presence(event)) => {
                    if tracker.apply(event) {
                        snapshot.send_replace(tracker.snapshot());
                    }
                }
                Some(other) => debug!(event = ?other, "Non-presence event on presence channel"),
                None => break,
            },
        }
    }

    // Without a live roster nobody can be shown online; callers fall back to
    // last-seen until presence is restarted.
    tracker.reset();
    snapshot.send_replace(tracker.snapshot());
    warn!(topic = %handle.key(), "Presence listener stopped");
}

#[cfg(test)]
mod tests {
    use kindred_store::{Database, SqliteStore};

    use super::*;
    use crate::hub::LocalHub;

    fn store() -> Arc<dyn DataStore> {
        Arc::new(SqliteStore::new(Database::open_in_memory().unwrap()))
    }

    /// With the clock paused, a sleep only returns once every task is idle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    async fn start(hub: &LocalHub, user: UserId, store: Arc<dyn DataStore>) -> PresenceService {
        let channels = Arc::new(ChannelManager::new(Arc::new(hub.clone()), user));
        PresenceService::start(channels, store, PresenceConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_participants_see_each_other() {
        let hub = LocalHub::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        let a = start(&hub, alice, store()).await;
        let b = start(&hub, bob, store()).await;
        settle().await;

        assert!(a.is_online(&bob));
        assert!(b.is_online(&alice));
        assert!(a.snapshot().is_synced());

        b.shutdown();
        settle().await;
        assert!(!a.is_online(&bob));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_subscription_never_tracks() {
        let hub = LocalHub::new();
        hub.withhold_acknowledgements(true);
        let me = UserId::new();
        let service = start(&hub, me, store()).await;
        settle().await;

        assert_eq!(hub.track_calls(), 0);
        assert!(hub.roster_keys(&ChannelKey::global_presence().to_topic()).is_empty());
        assert!(!service.is_online(&me));
        assert!(!service.snapshot().is_synced());
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_falls_back_to_last_seen() {
        let hub = LocalHub::new();
        let store = store();
        let (alice, bob, carol) = (UserId::new(), UserId::new(), UserId::new());
        let seen = Utc::now() - chrono::Duration::minutes(5);
        store.touch_last_seen(bob, seen).await.unwrap();

        let a = start(&hub, alice, store.clone()).await;
        settle().await;

        assert_eq!(a.display(alice).await, PresenceDisplay::Online);
        assert!(matches!(a.display(bob).await, PresenceDisplay::LastSeen(_)));
        assert_eq!(a.display(carol).await, PresenceDisplay::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_roster_clears_online_set() {
        let hub = LocalHub::new();
        let store = store();
        let (alice, bob) = (UserId::new(), UserId::new());
        let a = start(&hub, alice, store.clone()).await;
        let _b = start(&hub, bob, store.clone()).await;
        settle().await;
        assert!(a.is_online(&bob));

        hub.drop_connections();
        settle().await;

        assert!(!a.is_running());
        assert!(!a.is_online(&bob));
        assert!(!a.snapshot().is_synced());
        assert!(a.snapshot().is_empty());
        assert!(matches!(a.display(bob).await, PresenceDisplay::LastSeen(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_writes_last_seen_on_start() {
        let hub = LocalHub::new();
        let store = store();
        let me = UserId::new();
        let service = start(&hub, me, store.clone()).await;
        settle().await;

        assert!(store.fetch_last_seen(me).await.unwrap().is_some());
        service.shutdown();
        service.shutdown();
        assert!(!service.is_running());
    }
}
