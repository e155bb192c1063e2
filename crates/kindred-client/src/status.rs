//! Auto-clearing status text.
//!
//! Each flash carries a generation number. Its clear timer only clears the
//! line if no newer flash has been shown since.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::ClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Success,
    Failure,
    /// The action ran but had no effect.
    NoEffect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub text: String,
}

#[derive(Clone)]
pub struct StatusLine {
    current: Arc<watch::Sender<Option<Status>>>,
    generation: Arc<AtomicU64>,
    ttl_success: Duration,
    ttl_failure: Duration,
    ttl_no_effect: Duration,
}

impl StatusLine {
    pub fn new(config: &ClientConfig) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            current: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
            ttl_success: config.status_ttl_success,
            ttl_failure: config.status_ttl,
            ttl_no_effect: config.status_ttl_no_effect,
        }
    }

    pub fn success(&self, text: impl Into<String>) {
        self.flash(StatusKind::Success, text.into(), self.ttl_success);
    }

    pub fn failure(&self, text: impl Into<String>) {
        self.flash(StatusKind::Failure, text.into(), self.ttl_failure);
    }

    pub fn no_effect(&self, text: impl Into<String>) {
        self.flash(StatusKind::NoEffect, text.into(), self.ttl_no_effect);
    }

    fn flash(&self, kind: StatusKind, text: String, ttl: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(?kind, text = %text, "Status");
        self.current.send_replace(Some(Status { kind, text }));

        let current = self.current.clone();
        let latest = self.generation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if latest.load(Ordering::SeqCst) == generation {
                current.send_replace(None);
            }
        });
    }

    pub fn current(&self) -> Option<Status> {
        self.current.borrow().clone()
    }

    pub fn text(&self) -> Option<String> {
        self.current().map(|s| s.text)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Status>> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_status_clears_after_ttl() {
        let status = StatusLine::new(&ClientConfig::default());
        status.failure("Could not send message");
        assert_eq!(status.text().as_deref(), Some("Could not send message"));

        tokio::time::sleep(Duration::from_millis(1_499)).await;
        assert!(status.current().is_some());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(status.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_timer_does_not_clear_newer_text() {
        let status = StatusLine::new(&ClientConfig::default());
        status.success("Copied");
        tokio::time::sleep(Duration::from_millis(500)).await;
        status.failure("Could not delete message");

        // The success timer fires at 900 ms; the failure text must survive it.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            status.current().map(|s| s.kind),
            Some(StatusKind::Failure)
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(status.current().is_none());
    }
}
