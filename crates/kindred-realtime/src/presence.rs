//! Online roster tracking.
//!
//! A [`PresenceTracker`] folds presence events into the set of online
//! participants. The authoritative roster comes from `sync` snapshots; join
//! and leave deltas only adjust it between snapshots, and are ignored until
//! the first snapshot has arrived.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use kindred_shared::{PresenceEvent, PresencePayload, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unsynced,
    Synced,
}

#[derive(Debug)]
pub struct PresenceTracker {
    state: SyncState,
    online: HashSet<UserId>,
    payloads: HashMap<UserId, Vec<PresencePayload>>,
    ignored_deltas: u64,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            state: SyncState::Unsynced,
            online: HashSet::new(),
            payloads: HashMap::new(),
            ignored_deltas: 0,
        }
    }

    /// Fold one event into the roster. Returns `true` when the online set
    /// changed.
    pub fn apply(&mut self, event: PresenceEvent) -> bool {
        match event {
            PresenceEvent::Sync(roster) => {
                let online: HashSet<UserId> = roster.keys().copied().collect();
                let changed = self.state == SyncState::Unsynced || online != self.online;
                self.online = online;
                self.payloads = roster.into_iter().collect();
                self.state = SyncState::Synced;
                debug!(online = self.online.len(), "Presence sync");
                changed
            }
            PresenceEvent::Join { key, .. } | PresenceEvent::Leave { key }
                if self.state == SyncState::Unsynced =>
            {
                self.ignored_deltas += 1;
                debug!(user = %key.short(), "Presence delta before first sync ignored");
                false
            }
            PresenceEvent::Join { key, payload } => {
                if let Some(payload) = payload {
                    self.payloads.entry(key).or_default().push(payload);
                }
                self.online.insert(key)
            }
            PresenceEvent::Leave { key } => {
                self.payloads.remove(&key);
                self.online.remove(&key)
            }
        }
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }

    pub fn is_synced(&self) -> bool {
        self.state == SyncState::Synced
    }

    pub fn sync_state(&self) -> SyncState {
        self.state
    }

    pub fn online_ids(&self) -> impl Iterator<Item = &UserId> {
        self.online.iter()
    }

    /// Most recent payload tracked under `user`, if any.
    pub fn latest_payload(&self, user: &UserId) -> Option<&PresencePayload> {
        self.payloads.get(user)?.iter().max_by_key(|p| p.at)
    }

    /// Deltas dropped because they arrived before any snapshot.
    pub fn ignored_deltas(&self) -> u64 {
        self.ignored_deltas
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            online: Arc::new(self.online.clone()),
            synced: self.is_synced(),
        }
    }

    /// Forget everything, e.g. after the channel was torn down.
    pub fn reset(&mut self) {
        self.state = SyncState::Unsynced;
        self.online.clear();
        self.payloads.clear();
    }
}

/// Immutable view of the online set, cheap to clone and share.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    online: Arc<HashSet<UserId>>,
    synced: bool,
}

impl PresenceSnapshot {
    pub fn contains(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }
}

/// What to show next to a participant's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceDisplay {
    Online,
    LastSeen(DateTime<Utc>),
    Unknown,
}

impl PresenceDisplay {
    pub fn resolve(online: bool, last_seen: Option<DateTime<Utc>>) -> Self {
        match (online, last_seen) {
            (true, _) => Self::Online,
            (false, Some(at)) => Self::LastSeen(at),
            (false, None) => Self::Unknown,
        }
    }

    pub fn describe(&self, now: DateTime<Utc>) -> String {
        match self {
            Self::Online => "online".to_string(),
            Self::Unknown => "unknown".to_string(),
            Self::LastSeen(at) => {
                let secs = (now - *at).num_seconds().max(0);
                let ago = match secs {
                    0..=59 => "just now".to_string(),
                    60..=3599 => format!("{}m ago", secs / 60),
                    3600..=86_399 => format!("{}h ago", secs / 3600),
                    _ => format!("{}d ago", secs / 86_400),
                };
                format!("last seen {ago}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use kindred_shared::Roster;

    use super::*;

    fn roster(ids: &[UserId]) -> Roster {
        ids.iter().map(|id| (*id, Vec::new())).collect()
    }

    #[test]
    fn test_deltas_before_sync_are_ignored() {
        let mut tracker = PresenceTracker::new();
        let a = UserId::new();

        assert!(!tracker.apply(PresenceEvent::Join { key: a, payload: None }));
        assert!(!tracker.is_online(&a));
        assert_eq!(tracker.ignored_deltas(), 1);
        assert_eq!(tracker.sync_state(), SyncState::Unsynced);
    }

    #[test]
    fn test_sync_is_authoritative() {
        let mut tracker = PresenceTracker::new();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());

        tracker.apply(PresenceEvent::Sync(roster(&[a, b])));
        tracker.apply(PresenceEvent::Join { key: c, payload: None });
        tracker.apply(PresenceEvent::Leave { key: a });
        assert!(tracker.is_online(&c));
        assert!(!tracker.is_online(&a));

        // Snapshot replaces whatever the deltas built.
        assert!(tracker.apply(PresenceEvent::Sync(roster(&[a]))));
        assert!(tracker.is_online(&a));
        assert!(!tracker.is_online(&b));
        assert!(!tracker.is_online(&c));
    }

    #[test]
    fn test_identical_sync_reports_no_change() {
        let mut tracker = PresenceTracker::new();
        let a = UserId::new();
        assert!(tracker.apply(PresenceEvent::Sync(roster(&[a]))));
        assert!(!tracker.apply(PresenceEvent::Sync(roster(&[a]))));
    }

    #[test]
    fn test_first_empty_sync_counts_as_change() {
        let mut tracker = PresenceTracker::new();
        assert!(tracker.apply(PresenceEvent::Sync(Roster::new())));
        assert!(tracker.snapshot().is_synced());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut tracker = PresenceTracker::new();
        let a = UserId::new();
        tracker.apply(PresenceEvent::Sync(roster(&[a])));
        let snap = tracker.snapshot();
        tracker.apply(PresenceEvent::Leave { key: a });
        assert!(snap.contains(&a));
        assert!(!tracker.is_online(&a));
    }

    #[test]
    fn test_latest_payload() {
        let mut tracker = PresenceTracker::new();
        let a = UserId::new();
        let t0 = Utc::now();
        tracker.apply(PresenceEvent::Sync(Roster::new()));
        for at in [t0, t0 + Duration::seconds(5)] {
            tracker.apply(PresenceEvent::Join {
                key: a,
                payload: Some(PresencePayload { user_id: a, at }),
            });
        }
        assert_eq!(
            tracker.latest_payload(&a).map(|p| p.at),
            Some(t0 + Duration::seconds(5))
        );
    }

    #[test]
    fn test_display_resolution() {
        let now = Utc::now();
        assert_eq!(PresenceDisplay::resolve(true, Some(now)), PresenceDisplay::Online);
        assert_eq!(PresenceDisplay::resolve(false, None), PresenceDisplay::Unknown);

        let seen = PresenceDisplay::resolve(false, Some(now - Duration::minutes(5)));
        assert_eq!(seen.describe(now), "last seen 5m ago");
        assert_eq!(PresenceDisplay::Online.describe(now), "online");
        assert_eq!(
            PresenceDisplay::LastSeen(now - Duration::hours(3)).describe(now),
            "last seen 3h ago"
        );
    }
}
