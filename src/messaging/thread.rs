//! Thread model: pure queries over the message/recipient graph.
//!
//! Threads are two-level: a reply's `parent_id` always points at the
//! thread root, never at another reply. The write boundary
//! ([`crate::messaging::engine`]) enforces this, so root resolution
//! terminates after at most one hop and `COALESCE(parent_id, id)` is the
//! thread root id in SQL.

use sqlx::SqlitePool;

use super::{Message, MessageRow, MessagingError, RecipientRecord, MESSAGE_COLUMNS};

/// Load a message by id.
///
/// # Errors
///
/// Returns [`MessagingError::MessageNotFound`] if no row matches.
pub async fn load_message(db: &SqlitePool, message_id: i64) -> Result<Message, MessagingError> {
    let row: Option<MessageRow> =
        sqlx::query_as(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"))
            .bind(message_id)
            .fetch_optional(db)
            .await?;
    let row = row.ok_or(MessagingError::MessageNotFound(message_id))?;
    Message::from_row(row)
}

/// Resolve the thread root of a message by walking parent links.
///
/// Replies always store the root as their parent, so this takes at most
/// one hop; the loop guards against legacy rows that predate that rule.
///
/// # Errors
///
/// Returns [`MessagingError::MessageNotFound`] if the message or a parent
/// link is dangling.
pub async fn thread_root(db: &SqlitePool, message_id: i64) -> Result<Message, MessagingError> {
    let mut current = load_message(db, message_id).await?;
    while let Some(parent_id) = current.parent_id {
        current = load_message(db, parent_id).await?;
    }
    Ok(current)
}

/// All messages of a thread: the root plus its direct replies, ordered by
/// creation time ascending.
pub async fn thread_messages(
    db: &SqlitePool,
    root_id: i64,
) -> Result<Vec<Message>, MessagingError> {
    let rows: Vec<MessageRow> = sqlx::query_as(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages \
         WHERE id = ?1 OR parent_id = ?1 \
         ORDER BY created_at ASC, id ASC"
    ))
    .bind(root_id)
    .fetch_all(db)
    .await?;
    rows.into_iter().map(Message::from_row).collect()
}

/// Ids of all messages of a thread (root plus direct replies).
pub async fn thread_message_ids(
    db: &SqlitePool,
    root_id: i64,
) -> Result<Vec<i64>, MessagingError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM messages WHERE id = ?1 OR parent_id = ?1 ORDER BY created_at ASC, id ASC",
    )
    .bind(root_id)
    .fetch_all(db)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Thread participants: every author and every recipient across the
/// thread's messages, deduplicated, sorted by user id.
pub async fn thread_participants(
    db: &SqlitePool,
    root_id: i64,
) -> Result<Vec<i64>, MessagingError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT DISTINCT user_id FROM ( \
             SELECT author_id AS user_id FROM messages \
             WHERE id = ?1 OR parent_id = ?1 \
             UNION \
             SELECT r.recipient_id FROM message_recipients r \
             JOIN messages m ON m.id = r.message_id \
             WHERE m.id = ?1 OR m.parent_id = ?1 \
         ) ORDER BY user_id",
    )
    .bind(root_id)
    .fetch_all(db)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Recipient ids of a single message, sorted.
pub async fn recipients_of(db: &SqlitePool, message_id: i64) -> Result<Vec<i64>, MessagingError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT recipient_id FROM message_recipients WHERE message_id = ?1 ORDER BY recipient_id",
    )
    .bind(message_id)
    .fetch_all(db)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Full delivery records of a single message, sorted by recipient.
pub async fn recipient_records(
    db: &SqlitePool,
    message_id: i64,
) -> Result<Vec<RecipientRecord>, MessagingError> {
    let rows: Vec<(i64, i64, i64, i64, String)> = sqlx::query_as(
        "SELECT message_id, recipient_id, is_read, archived, created_at \
         FROM message_recipients WHERE message_id = ?1 ORDER BY recipient_id",
    )
    .bind(message_id)
    .fetch_all(db)
    .await?;
    Ok(rows
        .into_iter()
        .map(
            |(message_id, recipient_id, is_read, archived, created_at)| RecipientRecord {
                message_id,
                recipient_id,
                is_read: is_read != 0,
                archived: archived != 0,
                created_at: Some(created_at),
            },
        )
        .collect())
}
