//! Typing indicator.
//!
//! Outbound, [`TypingBroadcaster`] turns raw keystrokes into a debounced
//! boolean written to the typing row. Inbound, [`TypingMonitor`] turns other
//! participants' rows into a flag that clears itself after `max_age` even if
//! the explicit `false` never arrives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use kindred_shared::{ConversationId, DataStore, PushEvent, RowEvent, TypingRow, UserId};

use crate::channels::ChannelHandle;

// ---------------------------------------------------------------------------
// Debounce timer
// ---------------------------------------------------------------------------

/// A single cancellable deadline. Re-arming always cancels the pending one
/// first, so at most one expiry is ever outstanding.
#[derive(Debug, Default)]
pub struct DebounceTimer {
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rearm(&mut self, after: Duration) {
        self.cancel();
        self.deadline = Some(Instant::now() + after);
    }

    /// Returns `true` if a deadline was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves at the deadline; never resolves while unarmed.
    pub async fn fired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum TypingCommand {
    Keystroke,
    Stop,
    Shutdown,
}

/// Owns the local participant's typing state for one conversation.
///
/// All methods are synchronous and never wait on the backend. Dropping the
/// broadcaster behaves like [`TypingBroadcaster::shutdown`].
pub struct TypingBroadcaster {
    commands: mpsc::UnboundedSender<TypingCommand>,
    task: JoinHandle<()>,
}

impl TypingBroadcaster {
    pub fn spawn(
        store: Arc<dyn DataStore>,
        conversation: ConversationId,
        me: UserId,
        window: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = BroadcastWorker {
            store,
            conversation,
            me,
            window,
            timer: DebounceTimer::new(),
            announced: false,
            last_true: None,
        };
        Self {
            commands: tx,
            task: tokio::spawn(worker.run(rx)),
        }
    }

    /// Local input changed.
    pub fn keystroke(&self) {
        let _ = self.commands.send(TypingCommand::Keystroke);
    }

    /// Message sent: clear the flag now rather than at the timeout.
    pub fn stop(&self) {
        let _ = self.commands.send(TypingCommand::Stop);
    }

    /// Cancel the timer and write a final `false`. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.commands.send(TypingCommand::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for TypingBroadcaster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct BroadcastWorker {
    store: Arc<dyn DataStore>,
    conversation: ConversationId,
    me: UserId,
    window: Duration,
    timer: DebounceTimer,
    /// Last value written was `true`.
    announced: bool,
    last_true: Option<Instant>,
}

impl BroadcastWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<TypingCommand>) {
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(TypingCommand::Keystroke) => {
                        let stale = self
                            .last_true
                            .map_or(true, |at| at.elapsed() >= self.window);
                        if !self.announced || stale {
                            self.publish(true).await;
                        }
                        self.timer.rearm(self.window);
                    }
                    Some(TypingCommand::Stop) => {
                        self.timer.cancel();
                        if self.announced {
                            self.publish(false).await;
                        }
                    }
                    Some(TypingCommand::Shutdown) | None => {
                        self.timer.cancel();
                        self.publish(false).await;
                        break;
                    }
                },
                () = self.timer.fired() => {
                    self.timer.cancel();
                    if self.announced {
                        self.publish(false).await;
                    }
                }
            }
        }
        debug!(conversation = %self.conversation, "Typing broadcaster stopped");
    }

    async fn publish(&mut self, is_typing: bool) {
        self.announced = is_typing;
        if is_typing {
            self.last_true = Some(Instant::now());
        }

        let row = TypingRow {
            conversation_id: self.conversation,
            user_id: self.me,
            is_typing,
            updated_at: Utc::now(),
        };
        match self.store.upsert_typing(row).await {
            Ok(()) => debug!(conversation = %self.conversation, is_typing, "Typing published"),
            Err(e) => warn!(conversation = %self.conversation, error = %e, "Typing publish failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TypingMonitor {
    me: UserId,
    max_age: Duration,
    typing: HashMap<UserId, Instant>,
}

impl TypingMonitor {
    pub fn new(me: UserId, max_age: Duration) -> Self {
        Self {
            me,
            max_age,
            typing: HashMap::new(),
        }
    }

    /// Fold a remote typing row in. Rows from the local user are ignored.
    /// Returns `true` if anything changed.
    pub fn apply(&mut self, row: &TypingRow, now: Instant) -> bool {
        if row.user_id == self.me {
            return false;
        }
        if row.is_typing {
            self.typing.insert(row.user_id, now + self.max_age).is_none()
        } else {
            self.typing.remove(&row.user_id).is_some()
        }
    }

    /// Drop flags whose refresh is overdue.
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.typing.len();
        self.typing.retain(|_, expiry| *expiry > now);
        self.typing.len() != before
    }

    pub fn is_typing(&self, user: &UserId, now: Instant) -> bool {
        self.typing.get(user).is_some_and(|expiry| *expiry > now)
    }

    pub fn is_anyone_typing(&self, now: Instant) -> bool {
        self.typing.values().any(|expiry| *expiry > now)
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.typing.values().min().copied()
    }
}

/// Drive a [`TypingMonitor`] from a typing channel. The returned receiver
/// holds "someone else is typing"; it drops back to `false` when the channel
/// closes.
pub fn spawn_typing_watch(
    mut handle: ChannelHandle,
    me: UserId,
    max_age: Duration,
) -> (watch::Receiver<bool>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut monitor = TypingMonitor::new(me, max_age);
        loop {
            let next = monitor.next_expiry();
            tokio::select! {
                event = handle.recv() => match event {
                    Some(PushEvent::Typing(RowEvent::Insert(row) | RowEvent::Update(row))) => {
                        monitor.apply(&row, Instant::now());
                    }
                    Some(PushEvent::Typing(RowEvent::Delete(_))) => {}
                    Some(other) => debug!(event = ?other, "Non-typing event on typing channel"),
                    None => break,
                },
                _ = tokio::time::sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                    if monitor.expire(Instant::now()) {
                        debug!(topic = %handle.key(), "Typing flag expired");
                    }
                }
            }

            let anyone = monitor.is_anyone_typing(Instant::now());
            tx.send_if_modified(|flag| std::mem::replace(flag, anyone) != anyone);
        }
        tx.send_replace(false);
    });

    (rx, task)
}
