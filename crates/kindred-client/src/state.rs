//! Application state shared by every view.
//!
//! [`AppState`] holds the collaborators and, while someone is signed in, the
//! session-scoped realtime pieces: one [`ChannelManager`] and the global
//! [`PresenceService`]. Presence outlives conversation views; it starts on
//! sign-in and stops on sign-out.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use kindred_realtime::{ChannelManager, PresenceConfig, PresenceService, PushTransport};
use kindred_shared::{DataStore, LocalPrefs, SessionProvider, UserId};

use crate::clipboard::Clipboard;
use crate::config::ClientConfig;
use crate::error::ClientError;

/// Realtime pieces that exist only while a user is signed in.
#[derive(Clone)]
pub struct ActiveSession {
    pub user: UserId,
    pub channels: Arc<ChannelManager>,
    pub presence: Arc<PresenceService>,
}

pub struct AppState {
    pub config: ClientConfig,
    pub store: Arc<dyn DataStore>,
    pub prefs: Arc<dyn LocalPrefs>,
    pub transport: Arc<dyn PushTransport>,
    pub session: Arc<dyn SessionProvider>,
    pub clipboard: Arc<dyn Clipboard>,
    active: Mutex<Option<ActiveSession>>,
}

impl AppState {
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn DataStore>,
        prefs: Arc<dyn LocalPrefs>,
        transport: Arc<dyn PushTransport>,
        session: Arc<dyn SessionProvider>,
        clipboard: Arc<dyn Clipboard>,
    ) -> Self {
        Self {
            config,
            store,
            prefs,
            transport,
            session,
            clipboard,
            active: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start global presence for whoever the session provider reports.
    /// Signing in again as the same user is a no-op; a different user
    /// replaces the previous session.
    pub async fn sign_in(&self) -> Result<UserId, ClientError> {
        let user = self
            .session
            .current_user()
            .await
            .ok_or(ClientError::NoSession)?;

        if let Some(active) = self.lock().as_ref() {
            if active.user == user {
                return Ok(user);
            }
        }
        self.sign_out();

        let channels = Arc::new(ChannelManager::new(self.transport.clone(), user));
        let presence = PresenceService::start(
            channels.clone(),
            self.store.clone(),
            PresenceConfig {
                heartbeat_interval: self.config.heartbeat_interval,
            },
        )
        .await?;

        *self.lock() = Some(ActiveSession {
            user,
            channels,
            presence: Arc::new(presence),
        });

        info!(user = %user.short(), "Signed in");
        Ok(user)
    }

    /// Stop presence and close every channel. Returns immediately.
    pub fn sign_out(&self) {
        let Some(active) = self.lock().take() else {
            return;
        };
        active.presence.shutdown();
        let closed = active.channels.close_all();
        info!(user = %active.user.short(), closed, "Signed out");
    }

    pub fn active_session(&self) -> Option<ActiveSession> {
        self.lock().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.lock().is_some()
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.sign_out();
    }
}
