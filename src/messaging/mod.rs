//! Messaging subsystem: thread model, recipient resolution, the engine
//! verbs, and the notification contract.
//!
//! # SQLite Write Pattern
//!
//! Reads go directly through the shared pool (concurrent). Every mutating
//! verb (compose, reply, archive, mark-read) runs inside one SQLite
//! transaction, so multi-message operations — `reply_to_sender` fan-out
//! plus guardian carbon-copies — commit all-or-nothing. Notification
//! dispatch happens strictly after commit and never fails the verb.

pub mod engine;
pub mod notifier;
pub mod recipient;
pub mod thread;

use serde::{Deserialize, Serialize};

use crate::authz::AuthzError;
use crate::directory::DirectoryError;

/// Errors from the messaging subsystem.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Directory lookup failed.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Authorization oracle failed.
    #[error("authorization error: {0}")]
    Authz(#[from] AuthzError),

    /// Subject was empty.
    #[error("subject must not be empty")]
    EmptySubject,

    /// Body was empty.
    #[error("body must not be empty")]
    EmptyBody,

    /// Subject exceeded the configured maximum length.
    #[error("subject too long: {len} chars exceeds {max} char limit")]
    SubjectTooLong {
        /// Actual subject length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Body exceeded the configured maximum length.
    #[error("body too long: {len} chars exceeds {max} char limit")]
    BodyTooLong {
        /// Actual body length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Compose resolved to zero recipients.
    #[error("at least one recipient required")]
    NoRecipients,

    /// The sender may not message one or more of the resolved recipients.
    #[error("not permitted to message users {0:?}")]
    UnauthorizedRecipients(Vec<i64>),

    /// The user is not a participant of the thread.
    #[error("user {0} is not a participant of this thread")]
    NotAParticipant(i64),

    /// The thread root forbids replies.
    #[error("replies are disabled for this thread")]
    RepliesDisabled,

    /// The user holds no recipient record in the thread.
    #[error("user {0} is not a recipient of this thread")]
    NotARecipient(i64),

    /// No message with this id exists.
    #[error("message not found: {0}")]
    MessageNotFound(i64),

    /// An invalid reply mode value was read from the database.
    #[error("invalid reply_mode value: {0:?}")]
    InvalidReplyMode(String),
}

/// Per-thread reply policy, fixed at thread-root creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    /// No further replies permitted, ever.
    NoReplies,
    /// Recipients may reply only back to the original author. A root sent
    /// to several recipients under this mode fans out into one
    /// independent thread per recipient.
    ReplyToSender,
    /// Every participant sees every message and may reply to all.
    ReplyToAll,
}

impl ReplyMode {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoReplies => "no_replies",
            Self::ReplyToSender => "reply_to_sender",
            Self::ReplyToAll => "reply_to_all",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised reply mode.
    pub fn parse(s: &str) -> Result<Self, MessagingError> {
        match s {
            "no_replies" => Ok(Self::NoReplies),
            "reply_to_sender" => Ok(Self::ReplyToSender),
            "reply_to_all" => Ok(Self::ReplyToAll),
            other => Err(MessagingError::InvalidReplyMode(other.to_owned())),
        }
    }
}

/// Row type returned by SQLite queries for messages.
pub(crate) type MessageRow = (
    i64,
    i64,
    String,
    String,
    Option<i64>,
    String,
    i64,
    String,
);

/// A message in a thread. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Database row id (`None` for messages not yet persisted).
    pub id: Option<i64>,
    /// Authoring user.
    pub author_id: i64,
    /// Subject line (non-empty).
    pub subject: String,
    /// Body text (non-empty).
    pub body: String,
    /// Thread root this message replies to; `None` for thread roots.
    pub parent_id: Option<i64>,
    /// Reply policy, inherited from the thread root for replies.
    pub reply_mode: ReplyMode,
    /// Whether this message is routed to the support inbox.
    pub is_support: bool,
    /// ISO-8601 creation timestamp (set by SQLite on insert).
    pub created_at: Option<String>,
}

impl Message {
    /// True iff this message is a reply (has a parent).
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Map a SQLite row tuple into a message.
    pub(crate) fn from_row(row: MessageRow) -> Result<Self, MessagingError> {
        let (id, author_id, subject, body, parent_id, mode, is_support, created_at) = row;
        Ok(Self {
            id: Some(id),
            author_id,
            subject,
            body,
            parent_id,
            reply_mode: ReplyMode::parse(&mode)?,
            is_support: is_support != 0,
            created_at: Some(created_at),
        })
    }
}

/// Per-recipient delivery state for one message.
///
/// `is_read` and `archived` are the only mutable fields in the whole
/// message graph; both are flipped thread-wide by the engine verbs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRecord {
    /// Message this record belongs to.
    pub message_id: i64,
    /// Receiving user.
    pub recipient_id: i64,
    /// Whether the recipient has read the message.
    pub is_read: bool,
    /// Whether the recipient archived the thread containing the message.
    pub archived: bool,
    /// ISO-8601 creation timestamp (set by SQLite on insert).
    pub created_at: Option<String>,
}

/// Columns selected for every message query, in [`MessageRow`] order.
pub(crate) const MESSAGE_COLUMNS: &str =
    "id, author_id, subject, body, parent_id, reply_mode, is_support, created_at";
