//! Real-time notification contract and fan-out.
//!
//! The engine emits one event per affected recipient after each mutation
//! commits. Dispatch is fire-and-forget: the message is already persisted
//! by the time events go out, so delivery failure never rolls back or
//! fails the verb. [`BroadcastNotifier`] fans events out to connected
//! transport adapters (websocket sessions, push bridges) over a
//! [`tokio::sync::broadcast`] channel; adapters subscribe and filter by
//! target user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Rendered summary of a newly delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    /// The new message.
    pub message_id: i64,
    /// Root of the thread the message belongs to.
    pub thread_id: i64,
    /// Authoring user.
    pub author_id: i64,
    /// Author display name at send time.
    pub author_name: String,
    /// Subject line.
    pub subject: String,
    /// Whether the message is a support message.
    pub is_support: bool,
    /// ISO-8601 creation timestamp.
    pub created_at: Option<String>,
}

/// What happened, and to whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventKind {
    /// A message was delivered to the target user.
    NewMessage {
        /// Target recipient.
        user_id: i64,
        /// Summary of the delivered message.
        summary: MessageSummary,
    },
    /// The target user's count of distinct unread thread roots changed.
    UnreadCountChanged {
        /// Target recipient.
        user_id: i64,
        /// Current number of distinct unread thread roots.
        unread_threads: i64,
    },
}

/// A notification event emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierEvent {
    /// Unique event id.
    pub event_id: Uuid,
    /// When the event was emitted.
    pub emitted_at: DateTime<Utc>,
    /// Event payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl NotifierEvent {
    /// Build a `new-message` event for a recipient.
    pub fn new_message(user_id: i64, summary: MessageSummary) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            emitted_at: Utc::now(),
            kind: EventKind::NewMessage { user_id, summary },
        }
    }

    /// Build an `unread-count-changed` event for a recipient.
    pub fn unread_count_changed(user_id: i64, unread_threads: i64) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            emitted_at: Utc::now(),
            kind: EventKind::UnreadCountChanged {
                user_id,
                unread_threads,
            },
        }
    }

    /// The user this event targets.
    pub fn target_user(&self) -> i64 {
        match &self.kind {
            EventKind::NewMessage { user_id, .. }
            | EventKind::UnreadCountChanged { user_id, .. } => *user_id,
        }
    }
}

/// Notification sink interface.
///
/// Implementations must be `Send + Sync`; dispatch must not block on
/// slow consumers and must never surface an error to the engine.
pub trait Notifier: Send + Sync {
    /// Dispatch one event. Infallible from the engine's point of view.
    fn notify(&self, event: NotifierEvent);
}

/// Fan-out notifier over a [`broadcast`] channel.
///
/// Transport adapters call [`BroadcastNotifier::subscribe`] and filter
/// received events by [`NotifierEvent::target_user`]. Lagging subscribers
/// drop the oldest events (standard broadcast semantics); missed unread
/// counts are self-healing since each event carries the full count.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<NotifierEvent>,
}

impl BroadcastNotifier {
    /// Create a notifier with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<NotifierEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    /// Capacity 1024, matching a busy inbox burst without lag.
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: NotifierEvent) {
        // send fails only when no subscriber is connected; that is normal
        // during quiet periods.
        if self.tx.send(event).is_err() {
            trace!("notification dropped: no subscribers");
        }
    }
}

/// No-op notifier for callers that need no fan-out (CLI one-shots, tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: NotifierEvent) {}
}
