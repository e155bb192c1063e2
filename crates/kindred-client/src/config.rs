//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so the client starts with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use kindred_shared::constants::{
    HEARTBEAT_INTERVAL, STATUS_TTL_FAILURE, STATUS_TTL_NO_EFFECT, STATUS_TTL_SUCCESS,
    TYPING_DEBOUNCE,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// SQLite file backing the reference store.
    /// Env: `KINDRED_DB_PATH`
    /// Default: platform data directory, `kindred.db`
    pub database_path: Option<PathBuf>,

    /// Last-seen heartbeat period.
    /// Env: `KINDRED_HEARTBEAT_SECS`
    /// Default: 30 s
    pub heartbeat_interval: Duration,

    /// Quiet period before "stopped typing" is sent.
    /// Env: `KINDRED_TYPING_DEBOUNCE_MS`
    /// Default: 2500 ms
    pub typing_debounce: Duration,

    /// How long failure text stays on the status line.
    /// Env: `KINDRED_STATUS_TTL_MS`
    /// Default: 1500 ms
    pub status_ttl: Duration,

    pub status_ttl_success: Duration,
    pub status_ttl_no_effect: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            typing_debounce: TYPING_DEBOUNCE,
            status_ttl: STATUS_TTL_FAILURE,
            status_ttl_success: STATUS_TTL_SUCCESS,
            status_ttl_no_effect: STATUS_TTL_NO_EFFECT,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = var("KINDRED_DB_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = var("KINDRED_HEARTBEAT_SECS") {
            match parse_positive(&val) {
                Some(secs) => config.heartbeat_interval = Duration::from_secs(secs),
                None => tracing::warn!(value = %val, "Invalid KINDRED_HEARTBEAT_SECS, using default"),
            }
        }

        if let Some(val) = var("KINDRED_TYPING_DEBOUNCE_MS") {
            match parse_positive(&val) {
                Some(ms) => config.typing_debounce = Duration::from_millis(ms),
                None => tracing::warn!(
                    value = %val,
                    "Invalid KINDRED_TYPING_DEBOUNCE_MS, using default"
                ),
            }
        }

        if let Some(val) = var("KINDRED_STATUS_TTL_MS") {
            match parse_positive(&val) {
                Some(ms) => config.status_ttl = Duration::from_millis(ms),
                None => tracing::warn!(value = %val, "Invalid KINDRED_STATUS_TTL_MS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    /// Receiving side clears a remote typing flag after twice the debounce.
    pub fn typing_max_age(&self) -> Duration {
        self.typing_debounce * 2
    }
}

fn parse_positive(val: &str) -> Option<u64> {
    val.trim().parse::<u64>().ok().filter(|n| *n > 0)
}
