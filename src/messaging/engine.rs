//! Messaging engine: compose, reply, archive, mark-read, and the
//! read-path queries consumed by the web and API adapters.
//!
//! Every mutating verb validates input, resolves recipients, consults the
//! authorization oracle, persists inside a single transaction, and only
//! then hands events to the notifier. A failed verb leaves no partial
//! state behind; a failed notification leaves the committed state intact.

use std::sync::Arc;

use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};

use crate::authz::{perm, AuthzOracle};
use crate::config::MessagingConfig;
use crate::directory::Directory;

use super::notifier::{MessageSummary, Notifier, NotifierEvent};
use super::recipient::{self, RecipientDescriptor};
use super::thread;
use super::{Message, MessageRow, MessagingError, ReplyMode, MESSAGE_COLUMNS};

/// Fixed body of a guardian carbon-copy message.
const CC_NOTICE: &str = "This is a courtesy copy of a message sent to your mentee. \
Sign in to the platform to review your mentee's inbox.";

/// Subject prefix applied once per thread when replying.
const REPLY_PREFIX: &str = "Re: ";

/// Subject prefix marking guardian carbon-copies.
const CC_PREFIX: &str = "cc: ";

/// Result of a compose call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeOutcome {
    /// Ids of the created primary messages. One element except for
    /// `reply_to_sender` fan-out, where each recipient gets an
    /// independent root.
    pub message_ids: Vec<i64>,
    /// Ids of guardian carbon-copy messages, in creation order.
    pub cc_message_ids: Vec<i64>,
}

/// Result of a reply call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutcome {
    /// Id of the created reply.
    pub message_id: i64,
    /// Ids of guardian carbon-copy messages.
    pub cc_message_ids: Vec<i64>,
}

/// One thread in an inbox/archived listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadListing {
    /// Thread root id.
    pub thread_id: i64,
    /// Root subject.
    pub subject: String,
    /// Root author.
    pub author_id: i64,
    /// Root creation timestamp.
    pub created_at: String,
    /// Timestamp of the newest message delivered to the viewer.
    pub last_activity: String,
    /// Whether any of the viewer's records in the thread is unread.
    pub unread: bool,
}

/// Addressing options offered on a compose screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeOptions {
    /// Users the caller may address directly.
    pub users: Vec<i64>,
    /// Group tokens the caller may address (`support` always included).
    pub groups: Vec<String>,
}

/// Row type for thread listing queries.
type ListingRow = (i64, String, i64, String, String, i64);

/// The messaging engine. Cheap to clone via the shared pool and trait
/// objects.
#[derive(Clone)]
pub struct MessagingEngine {
    db: SqlitePool,
    directory: Arc<dyn Directory>,
    authz: Arc<dyn AuthzOracle>,
    notifier: Arc<dyn Notifier>,
    limits: MessagingConfig,
}

impl std::fmt::Debug for MessagingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingEngine")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl MessagingEngine {
    /// Create an engine over the shared pool and collaborator seams.
    pub fn new(
        db: SqlitePool,
        directory: Arc<dyn Directory>,
        authz: Arc<dyn AuthzOracle>,
        notifier: Arc<dyn Notifier>,
        limits: MessagingConfig,
    ) -> Self {
        Self {
            db,
            directory,
            authz,
            notifier,
            limits,
        }
    }

    /// Returns a reference to the underlying pool (for migrations, tests).
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    // ── Compose ─────────────────────────────────────────────────

    /// Compose a new thread root (or several, under fan-out).
    ///
    /// Support messages (a `support` descriptor or `is_support`) are
    /// forced to `reply_to_all` and routed to the live support inbox set,
    /// bypassing per-recipient authorization. Non-support messages fail
    /// atomically if the author may not message any resolved recipient.
    /// A `reply_to_sender` root with several recipients fans out into one
    /// independent single-recipient thread each. Guardians of mentee
    /// recipients receive a non-repliable carbon-copy per created
    /// message.
    ///
    /// # Errors
    ///
    /// Validation errors for empty/oversized subject or body and for an
    /// empty recipient set (support exempt);
    /// [`MessagingError::UnauthorizedRecipients`] naming every recipient
    /// the author may not message; database errors.
    pub async fn compose(
        &self,
        author: i64,
        subject: &str,
        body: &str,
        descriptors: &[RecipientDescriptor],
        reply_mode: ReplyMode,
        is_support: bool,
    ) -> Result<ComposeOutcome, MessagingError> {
        self.validate_subject(subject)?;
        self.validate_body(body)?;

        let is_support = is_support
            || descriptors
                .iter()
                .any(|d| matches!(d, RecipientDescriptor::Support));
        // Support threads are always visible to all participants.
        let reply_mode = if is_support {
            ReplyMode::ReplyToAll
        } else {
            reply_mode
        };

        let (action, resource) = perm::SEND_GROUP_MESSAGE;
        let may_broadcast = self.authz.has_permission(author, action, resource).await?;
        let mut recipients =
            recipient::resolve(self.directory.as_ref(), author, descriptors, may_broadcast)
                .await?;

        if is_support {
            // Live query per send: support staffing changes take effect
            // immediately, and anyone may contact support.
            let (action, resource) = perm::READ_SUPPORT_INBOX;
            for id in self.authz.users_with_permission(action, resource).await? {
                if id != author && !recipients.contains(&id) {
                    recipients.push(id);
                }
            }
        } else {
            let mut unauthorized = Vec::new();
            for &candidate in &recipients {
                if !self.authz.can_message(author, candidate, None).await? {
                    unauthorized.push(candidate);
                }
            }
            if !unauthorized.is_empty() {
                return Err(MessagingError::UnauthorizedRecipients(unauthorized));
            }
            if recipients.is_empty() {
                return Err(MessagingError::NoRecipients);
            }
        }

        // Fan-out: one independent root per recipient, so recipients of a
        // reply_to_sender broadcast can never see each other's replies.
        let recipient_sets: Vec<Vec<i64>> =
            if reply_mode == ReplyMode::ReplyToSender && recipients.len() > 1 {
                recipients.iter().map(|&r| vec![r]).collect()
            } else {
                vec![recipients]
            };

        // Guardian CCs are computed per created message, before the
        // transaction starts (the pool may be single-connection).
        let mut cc_sets: Vec<Vec<i64>> = Vec::with_capacity(recipient_sets.len());
        for set in &recipient_sets {
            cc_sets.push(recipient::guardian_cc(self.directory.as_ref(), author, set).await?);
        }

        let mut tx = self.db.begin().await?;
        let mut message_ids = Vec::with_capacity(recipient_sets.len());
        let mut cc_message_ids = Vec::new();
        for (set, ccs) in recipient_sets.iter().zip(&cc_sets) {
            let message_id =
                insert_message(&mut tx, author, subject, body, None, reply_mode, is_support)
                    .await?;
            insert_recipients(&mut tx, message_id, set).await?;
            message_ids.push(message_id);

            if !ccs.is_empty() {
                let cc_subject = format!("{CC_PREFIX}{subject}");
                let cc_id = insert_message(
                    &mut tx,
                    author,
                    &cc_subject,
                    CC_NOTICE,
                    None,
                    ReplyMode::NoReplies,
                    false,
                )
                .await?;
                insert_recipients(&mut tx, cc_id, ccs).await?;
                cc_message_ids.push(cc_id);
            }
        }
        tx.commit().await?;

        info!(
            author,
            messages = message_ids.len(),
            ccs = cc_message_ids.len(),
            support = is_support,
            mode = reply_mode.as_str(),
            "compose committed"
        );

        for &id in message_ids.iter().chain(&cc_message_ids) {
            self.announce(id).await;
        }
        Ok(ComposeOutcome {
            message_ids,
            cc_message_ids,
        })
    }

    // ── Reply ───────────────────────────────────────────────────

    /// Reply to a thread.
    ///
    /// The reply attaches to the thread root regardless of which message
    /// in the thread was named, inheriting the root's reply mode and
    /// support flag. Recipients follow the root's reply mode; the subject
    /// gains a single `Re: ` prefix.
    ///
    /// # Errors
    ///
    /// [`MessagingError::MessageNotFound`] for a dangling parent id;
    /// [`MessagingError::NotAParticipant`] unless the replier is a thread
    /// participant or holds the `reply any_message` permission;
    /// [`MessagingError::RepliesDisabled`] for `no_replies` roots;
    /// body validation and database errors.
    pub async fn reply(
        &self,
        replier: i64,
        parent_id: i64,
        body: &str,
    ) -> Result<ReplyOutcome, MessagingError> {
        self.validate_body(body)?;

        let root = thread::thread_root(&self.db, parent_id).await?;
        let root_id = root.id.ok_or(MessagingError::MessageNotFound(parent_id))?;

        let participants = thread::thread_participants(&self.db, root_id).await?;
        if !participants.contains(&replier) {
            let (action, resource) = perm::REPLY_ANY_MESSAGE;
            if !self.authz.has_permission(replier, action, resource).await? {
                return Err(MessagingError::NotAParticipant(replier));
            }
        }
        if root.reply_mode == ReplyMode::NoReplies {
            return Err(MessagingError::RepliesDisabled);
        }

        let recipients = match root.reply_mode {
            ReplyMode::ReplyToAll => participants
                .into_iter()
                .filter(|&p| p != replier)
                .collect::<Vec<_>>(),
            // The original author replying on their own reply_to_sender
            // thread addresses the root's original recipient set; anyone
            // else replies to the author alone.
            ReplyMode::ReplyToSender if replier == root.author_id => {
                thread::recipients_of(&self.db, root_id).await?
            }
            ReplyMode::ReplyToSender => vec![root.author_id],
            ReplyMode::NoReplies => return Err(MessagingError::RepliesDisabled),
        };

        let subject = reply_subject(&root.subject);
        let ccs = recipient::guardian_cc(self.directory.as_ref(), replier, &recipients).await?;

        let mut tx = self.db.begin().await?;
        let message_id = insert_message(
            &mut tx,
            replier,
            &subject,
            body,
            Some(root_id),
            root.reply_mode,
            root.is_support,
        )
        .await?;
        insert_recipients(&mut tx, message_id, &recipients).await?;
        let mut cc_message_ids = Vec::new();
        if !ccs.is_empty() {
            let cc_subject = format!("{CC_PREFIX}{subject}");
            let cc_id = insert_message(
                &mut tx,
                replier,
                &cc_subject,
                CC_NOTICE,
                None,
                ReplyMode::NoReplies,
                false,
            )
            .await?;
            insert_recipients(&mut tx, cc_id, &ccs).await?;
            cc_message_ids.push(cc_id);
        }
        tx.commit().await?;

        info!(replier, thread = root_id, message_id, "reply committed");

        self.announce(message_id).await;
        for &id in &cc_message_ids {
            self.announce(id).await;
        }
        Ok(ReplyOutcome {
            message_id,
            cc_message_ids,
        })
    }

    // ── Per-recipient state ─────────────────────────────────────

    /// Archive every recipient record of `user` across the thread
    /// containing `message_id`.
    ///
    /// # Errors
    ///
    /// [`MessagingError::NotARecipient`] if the user holds no record in
    /// the thread; [`MessagingError::MessageNotFound`] for a bad id.
    pub async fn archive(&self, user: i64, message_id: i64) -> Result<(), MessagingError> {
        self.set_archived(user, message_id, true).await
    }

    /// Unarchive every recipient record of `user` across the thread.
    ///
    /// # Errors
    ///
    /// Same as [`MessagingEngine::archive`].
    pub async fn unarchive(&self, user: i64, message_id: i64) -> Result<(), MessagingError> {
        self.set_archived(user, message_id, false).await
    }

    async fn set_archived(
        &self,
        user: i64,
        message_id: i64,
        archived: bool,
    ) -> Result<(), MessagingError> {
        let root = thread::thread_root(&self.db, message_id).await?;
        let root_id = root.id.ok_or(MessagingError::MessageNotFound(message_id))?;

        let result = sqlx::query(
            "UPDATE message_recipients SET archived = ?1 \
             WHERE recipient_id = ?2 \
               AND message_id IN (SELECT id FROM messages WHERE id = ?3 OR parent_id = ?3)",
        )
        .bind(i64::from(archived))
        .bind(user)
        .bind(root_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MessagingError::NotARecipient(user));
        }
        debug!(user, thread = root_id, archived, "thread archive state set");
        Ok(())
    }

    /// Mark every recipient record of `user` across the thread as read.
    ///
    /// Idempotent; a user with no records in the thread is a no-op. Emits
    /// an unread-count event when anything changed.
    ///
    /// # Errors
    ///
    /// [`MessagingError::MessageNotFound`] for a bad id; database errors.
    pub async fn mark_thread_read(&self, user: i64, message_id: i64) -> Result<(), MessagingError> {
        let root = thread::thread_root(&self.db, message_id).await?;
        let root_id = root.id.ok_or(MessagingError::MessageNotFound(message_id))?;

        let result = sqlx::query(
            "UPDATE message_recipients SET is_read = 1 \
             WHERE recipient_id = ?1 AND is_read = 0 \
               AND message_id IN (SELECT id FROM messages WHERE id = ?2 OR parent_id = ?2)",
        )
        .bind(user)
        .bind(root_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() > 0 {
            match self.unread_thread_count(user).await {
                Ok(count) => self
                    .notifier
                    .notify(NotifierEvent::unread_count_changed(user, count)),
                Err(e) => warn!(user, error = %e, "failed to recount unread threads"),
            }
        }
        Ok(())
    }

    // ── Read path ───────────────────────────────────────────────

    /// The thread containing `message_id`, filtered by the visibility
    /// rule: `reply_to_all` threads and the root author see everything;
    /// other participants see the root plus their own replies only.
    ///
    /// # Errors
    ///
    /// [`MessagingError::NotAParticipant`] for viewers outside the
    /// thread; [`MessagingError::MessageNotFound`] for a bad id.
    pub async fn visible_thread(
        &self,
        viewer: i64,
        message_id: i64,
    ) -> Result<Vec<Message>, MessagingError> {
        let root = thread::thread_root(&self.db, message_id).await?;
        let root_id = root.id.ok_or(MessagingError::MessageNotFound(message_id))?;

        let participants = thread::thread_participants(&self.db, root_id).await?;
        if !participants.contains(&viewer) {
            return Err(MessagingError::NotAParticipant(viewer));
        }
        let messages = thread::thread_messages(&self.db, root_id).await?;
        if root.reply_mode == ReplyMode::ReplyToAll || viewer == root.author_id {
            return Ok(messages);
        }
        Ok(messages
            .into_iter()
            .filter(|m| !m.is_reply() || m.author_id == viewer)
            .collect())
    }

    /// Unarchived threads in which `user` is a recipient, newest activity
    /// first.
    pub async fn inbox(&self, user: i64) -> Result<Vec<ThreadListing>, MessagingError> {
        self.listing(user, false).await
    }

    /// Archived threads for `user`, newest activity first.
    pub async fn archived(&self, user: i64) -> Result<Vec<ThreadListing>, MessagingError> {
        self.listing(user, true).await
    }

    async fn listing(
        &self,
        user: i64,
        archived: bool,
    ) -> Result<Vec<ThreadListing>, MessagingError> {
        // A thread counts as archived only when every record the user
        // holds in it is archived; fresh replies reopen the thread.
        let rows: Vec<ListingRow> = sqlx::query_as(
            "SELECT t.thread_id, root.subject, root.author_id, root.created_at, \
                    t.last_activity, t.has_unread \
             FROM ( \
                 SELECT COALESCE(m.parent_id, m.id) AS thread_id, \
                        MAX(m.created_at) AS last_activity, \
                        MAX(1 - r.is_read) AS has_unread, \
                        MIN(r.archived) AS all_archived \
                 FROM message_recipients r \
                 JOIN messages m ON m.id = r.message_id \
                 WHERE r.recipient_id = ?1 \
                 GROUP BY thread_id \
             ) t \
             JOIN messages root ON root.id = t.thread_id \
             WHERE t.all_archived = ?2 \
             ORDER BY t.last_activity DESC, t.thread_id DESC",
        )
        .bind(user)
        .bind(i64::from(archived))
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(thread_id, subject, author_id, created_at, last_activity, has_unread)| {
                    ThreadListing {
                        thread_id,
                        subject,
                        author_id,
                        created_at,
                        last_activity,
                        unread: has_unread != 0,
                    }
                },
            )
            .collect())
    }

    /// Root messages authored by `user`, newest first.
    pub async fn sent(&self, user: i64) -> Result<Vec<Message>, MessagingError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE author_id = ?1 AND parent_id IS NULL \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(user)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(Message::from_row).collect()
    }

    /// Number of distinct thread roots holding at least one unread record
    /// of `user` (threads, not individual messages).
    pub async fn unread_thread_count(&self, user: i64) -> Result<i64, MessagingError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT COALESCE(m.parent_id, m.id)) \
             FROM message_recipients r \
             JOIN messages m ON m.id = r.message_id \
             WHERE r.recipient_id = ?1 AND r.is_read = 0",
        )
        .bind(user)
        .fetch_one(&self.db)
        .await?;
        Ok(row.0)
    }

    /// Users and group tokens the caller may address when composing.
    pub async fn compose_options(&self, user: i64) -> Result<ComposeOptions, MessagingError> {
        let users = self.authz.messageable_users(user).await?;
        let mut groups = vec!["support".to_owned()];
        let (action, resource) = perm::SEND_GROUP_MESSAGE;
        if self.authz.has_permission(user, action, resource).await? {
            groups.extend(
                ["everyone", "staff", "mentors", "mentees", "guardians"]
                    .iter()
                    .map(|g| format!("group:{g}")),
            );
            for team in self.directory.teams().await? {
                groups.push(format!("group:team:{}", team.id));
            }
        }
        Ok(ComposeOptions { users, groups })
    }

    /// Destroy a thread root and, by cascade, its replies and every
    /// recipient record. Only the root author may destroy a thread.
    ///
    /// # Errors
    ///
    /// [`MessagingError::NotAParticipant`] for non-authors;
    /// [`MessagingError::MessageNotFound`] for a bad id.
    pub async fn destroy_thread(&self, user: i64, message_id: i64) -> Result<(), MessagingError> {
        let root = thread::thread_root(&self.db, message_id).await?;
        let root_id = root.id.ok_or(MessagingError::MessageNotFound(message_id))?;
        if root.author_id != user {
            return Err(MessagingError::NotAParticipant(user));
        }
        sqlx::query("DELETE FROM messages WHERE id = ?1")
            .bind(root_id)
            .execute(&self.db)
            .await?;
        info!(user, thread = root_id, "thread destroyed");
        Ok(())
    }

    // ── Notification fan-out ────────────────────────────────────

    /// Emit `new-message` and `unread-count-changed` events for every
    /// recipient of a committed message. Failures are logged, never
    /// propagated: the mutation has already committed.
    async fn announce(&self, message_id: i64) {
        if let Err(e) = self.try_announce(message_id).await {
            warn!(message_id, error = %e, "notification fan-out failed");
        }
    }

    async fn try_announce(&self, message_id: i64) -> Result<(), MessagingError> {
        let message = thread::load_message(&self.db, message_id).await?;
        let recipients = thread::recipients_of(&self.db, message_id).await?;
        let author_name = self
            .directory
            .display_name(message.author_id)
            .await?
            .unwrap_or_else(|| format!("user {}", message.author_id));
        let thread_id = message.parent_id.unwrap_or(message_id);

        for recipient in recipients {
            let summary = MessageSummary {
                message_id,
                thread_id,
                author_id: message.author_id,
                author_name: author_name.clone(),
                subject: message.subject.clone(),
                is_support: message.is_support,
                created_at: message.created_at.clone(),
            };
            self.notifier
                .notify(NotifierEvent::new_message(recipient, summary));
            let count = self.unread_thread_count(recipient).await?;
            self.notifier
                .notify(NotifierEvent::unread_count_changed(recipient, count));
        }
        Ok(())
    }

    // ── Validation ──────────────────────────────────────────────

    fn validate_subject(&self, subject: &str) -> Result<(), MessagingError> {
        if subject.trim().is_empty() {
            return Err(MessagingError::EmptySubject);
        }
        let len = subject.chars().count();
        if len > self.limits.max_subject_len {
            return Err(MessagingError::SubjectTooLong {
                len,
                max: self.limits.max_subject_len,
            });
        }
        Ok(())
    }

    fn validate_body(&self, body: &str) -> Result<(), MessagingError> {
        if body.trim().is_empty() {
            return Err(MessagingError::EmptyBody);
        }
        let len = body.chars().count();
        if len > self.limits.max_body_len {
            return Err(MessagingError::BodyTooLong {
                len,
                max: self.limits.max_body_len,
            });
        }
        Ok(())
    }
}

/// Prefix a subject with `Re: ` exactly once.
fn reply_subject(subject: &str) -> String {
    if subject.starts_with(REPLY_PREFIX) {
        subject.to_owned()
    } else {
        format!("{REPLY_PREFIX}{subject}")
    }
}

/// Insert one message row inside the transaction, returning its id.
async fn insert_message(
    tx: &mut Transaction<'_, Sqlite>,
    author: i64,
    subject: &str,
    body: &str,
    parent_id: Option<i64>,
    reply_mode: ReplyMode,
    is_support: bool,
) -> Result<i64, MessagingError> {
    let result = sqlx::query(
        "INSERT INTO messages (author_id, subject, body, parent_id, reply_mode, is_support) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(author)
    .bind(subject)
    .bind(body)
    .bind(parent_id)
    .bind(reply_mode.as_str())
    .bind(i64::from(is_support))
    .execute(&mut **tx)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Insert one recipient record per user inside the transaction.
async fn insert_recipients(
    tx: &mut Transaction<'_, Sqlite>,
    message_id: i64,
    recipients: &[i64],
) -> Result<(), MessagingError> {
    for &recipient in recipients {
        sqlx::query(
            "INSERT INTO message_recipients (message_id, recipient_id) VALUES (?1, ?2)",
        )
        .bind(message_id)
        .bind(recipient)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
