//! Periodic last-seen writer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use kindred_shared::{DataStore, UserId};

/// Writes the local user's last-seen timestamp immediately and then once per
/// period until stopped. Write failures are logged and otherwise ignored.
pub struct Heartbeat {
    store: Arc<dyn DataStore>,
    user: UserId,
    task: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn spawn(store: Arc<dyn DataStore>, user: UserId, period: Duration) -> Self {
        let task = tokio::spawn({
            let store = store.clone();
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    // First tick completes immediately.
                    ticker.tick().await;
                    touch(store.as_ref(), user).await;
                }
            }
        });

        debug!(user = %user.short(), period_secs = period.as_secs(), "Heartbeat started");

        Self {
            store,
            user,
            task: Some(task),
        }
    }

    /// Fire one out-of-band write without waiting for it.
    pub fn touch_now(&self) {
        let store = self.store.clone();
        let user = self.user;
        tokio::spawn(async move { touch(store.as_ref(), user).await });
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(user = %self.user.short(), "Heartbeat stopped");
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) async fn touch(store: &dyn DataStore, user: UserId) {
    if let Err(e) = store.touch_last_seen(user, Utc::now()).await {
        warn!(user = %user.short(), error = %e, "Last-seen write failed");
    }
}
