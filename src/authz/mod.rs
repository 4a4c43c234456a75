//! Authorization oracle consumed by the messaging engine.
//!
//! The engine never decides permissions itself; it asks the
//! [`AuthzOracle`] per pair of users or per (action, resource) symbol.
//! [`SqliteAuthz`] is the platform's default oracle: explicit grants in
//! the `permission_grants` table plus a small set of role rules.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::directory::Role;

/// Permission symbols consulted by the messaging engine.
pub mod perm {
    /// Staff-tier privilege required to address group recipient tokens.
    pub const SEND_GROUP_MESSAGE: (&str, &str) = ("send", "group_message");
    /// Marks a user as part of the support inbox rotation.
    pub const READ_SUPPORT_INBOX: (&str, &str) = ("read", "support_inbox");
    /// Allows replying to any thread regardless of participation.
    pub const REPLY_ANY_MESSAGE: (&str, &str) = ("reply", "any_message");
    /// Allows messaging any user regardless of role rules.
    pub const SEND_ANY_USER: (&str, &str) = ("send", "any_user");
}

/// Errors from authorization checks.
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Authorization decision interface.
///
/// All implementations must be `Send + Sync` to allow shared use across
/// async task boundaries.
#[async_trait]
pub trait AuthzOracle: Send + Sync {
    /// May `sender` address `candidate` directly?
    ///
    /// `in_thread_with` names a message whose thread already connects the
    /// pair (replies consult this); a shared thread always authorizes.
    async fn can_message(
        &self,
        sender: i64,
        candidate: i64,
        in_thread_with: Option<i64>,
    ) -> Result<bool, AuthzError>;

    /// Does `user` hold an (action, resource) permission?
    async fn has_permission(
        &self,
        user: i64,
        action: &str,
        resource: &str,
    ) -> Result<bool, AuthzError>;

    /// All users holding an (action, resource) permission.
    async fn users_with_permission(
        &self,
        action: &str,
        resource: &str,
    ) -> Result<Vec<i64>, AuthzError>;

    /// Users the given user may address when composing.
    async fn messageable_users(&self, user: i64) -> Result<Vec<i64>, AuthzError>;
}

/// Default oracle over the shared platform database.
///
/// Rules, in order:
/// 1. a user may always message themselves;
/// 2. an explicit `send any_user` grant, or a staff or mentor role,
///    authorizes any recipient;
/// 3. a guardian link between the pair (either direction) authorizes;
/// 4. a recipient holding a staff or mentor role is always reachable
///    (mentees and guardians can contact program adults);
/// 5. an existing thread in which both are participants authorizes,
///    co-recipients included.
///
/// Staff implicitly hold `send group_message`, `reply any_message` and
/// `send any_user`; support-inbox membership is always an explicit grant.
#[derive(Debug, Clone)]
pub struct SqliteAuthz {
    pool: SqlitePool,
}

impl SqliteAuthz {
    /// Create an oracle over the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Are both users participants (author or recipient) of any common
    /// thread? Co-recipients count: two mentees placed in one staff
    /// thread are connected even though neither authored a message the
    /// other received.
    async fn share_thread(&self, a: i64, b: i64) -> Result<bool, AuthzError> {
        // COALESCE(parent_id, id) is the thread root (two-level shape).
        let row: Option<(i64,)> = sqlx::query_as(
            "WITH participant AS ( \
                 SELECT COALESCE(m.parent_id, m.id) AS thread_id, \
                        m.author_id AS user_id \
                 FROM messages m \
                 UNION \
                 SELECT COALESCE(m.parent_id, m.id), r.recipient_id \
                 FROM message_recipients r \
                 JOIN messages m ON m.id = r.message_id \
             ) \
             SELECT 1 FROM participant pa \
             JOIN participant pb ON pb.thread_id = pa.thread_id \
             WHERE pa.user_id = ?1 AND pb.user_id = ?2 \
             LIMIT 1",
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Are both users participants (author or recipient) of the thread
    /// containing the given message?
    async fn both_in_thread(&self, message_id: i64, a: i64, b: i64) -> Result<bool, AuthzError> {
        // COALESCE(parent_id, id) is the thread root (two-level shape).
        let row: Option<(i64,)> = sqlx::query_as(
            "WITH root AS ( \
                 SELECT COALESCE(parent_id, id) AS id FROM messages WHERE id = ?1 \
             ), \
             member AS ( \
                 SELECT m.author_id AS user_id FROM messages m \
                 JOIN root ON COALESCE(m.parent_id, m.id) = root.id \
                 UNION \
                 SELECT r.recipient_id FROM message_recipients r \
                 JOIN messages m ON m.id = r.message_id \
                 JOIN root ON COALESCE(m.parent_id, m.id) = root.id \
             ) \
             SELECT 1 WHERE EXISTS (SELECT 1 FROM member WHERE user_id = ?2) \
                        AND EXISTS (SELECT 1 FROM member WHERE user_id = ?3)",
        )
        .bind(message_id)
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn holds_role(&self, user: i64, role: Role) -> Result<bool, AuthzError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM role_profiles WHERE user_id = ?1 AND role = ?2")
                .bind(user)
                .bind(role.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn guardian_linked(&self, a: i64, b: i64) -> Result<bool, AuthzError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM guardian_links \
             WHERE (mentee_id = ?1 AND guardian_id = ?2) \
                OR (mentee_id = ?2 AND guardian_id = ?1)",
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl AuthzOracle for SqliteAuthz {
    async fn can_message(
        &self,
        sender: i64,
        candidate: i64,
        in_thread_with: Option<i64>,
    ) -> Result<bool, AuthzError> {
        if sender == candidate {
            return Ok(true);
        }
        let (action, resource) = perm::SEND_ANY_USER;
        if self.has_permission(sender, action, resource).await?
            || self.holds_role(sender, Role::Staff).await?
            || self.holds_role(sender, Role::Mentor).await?
        {
            return Ok(true);
        }
        if self.guardian_linked(sender, candidate).await? {
            return Ok(true);
        }
        if self.holds_role(candidate, Role::Staff).await?
            || self.holds_role(candidate, Role::Mentor).await?
        {
            return Ok(true);
        }
        if let Some(message_id) = in_thread_with {
            if self.both_in_thread(message_id, sender, candidate).await? {
                return Ok(true);
            }
        }
        self.share_thread(sender, candidate).await
    }

    async fn has_permission(
        &self,
        user: i64,
        action: &str,
        resource: &str,
    ) -> Result<bool, AuthzError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM permission_grants \
             WHERE user_id = ?1 AND action = ?2 AND resource = ?3",
        )
        .bind(user)
        .bind(action)
        .bind(resource)
        .fetch_optional(&self.pool)
        .await?;
        if row.is_some() {
            return Ok(true);
        }
        // Staff implicitly hold the messaging-tier permissions. Support
        // inbox membership stays grant-only: it is a staffed rotation,
        // not a role perk.
        let implied = [
            perm::SEND_GROUP_MESSAGE,
            perm::REPLY_ANY_MESSAGE,
            perm::SEND_ANY_USER,
        ];
        if implied.contains(&(action, resource)) {
            return self.holds_role(user, Role::Staff).await;
        }
        Ok(false)
    }

    async fn users_with_permission(
        &self,
        action: &str,
        resource: &str,
    ) -> Result<Vec<i64>, AuthzError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT user_id FROM permission_grants \
             WHERE action = ?1 AND resource = ?2 ORDER BY user_id",
        )
        .bind(action)
        .bind(resource)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn messageable_users(&self, user: i64) -> Result<Vec<i64>, AuthzError> {
        let (action, resource) = perm::SEND_ANY_USER;
        if self.has_permission(user, action, resource).await?
            || self.holds_role(user, Role::Staff).await?
            || self.holds_role(user, Role::Mentor).await?
        {
            let rows: Vec<(i64,)> =
                sqlx::query_as("SELECT id FROM users WHERE id != ?1 ORDER BY id")
                    .bind(user)
                    .fetch_all(&self.pool)
                    .await?;
            return Ok(rows.into_iter().map(|(id,)| id).collect());
        }
        // Program adults, guardian-linked users, and thread contacts.
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT user_id FROM ( \
                 SELECT user_id FROM role_profiles WHERE role IN ('staff', 'mentor') \
                 UNION \
                 SELECT guardian_id FROM guardian_links WHERE mentee_id = ?1 \
                 UNION \
                 SELECT mentee_id FROM guardian_links WHERE guardian_id = ?1 \
                 UNION \
                 SELECT r.recipient_id FROM messages m \
                 JOIN message_recipients r ON r.message_id = m.id \
                 WHERE m.author_id = ?1 \
                 UNION \
                 SELECT m.author_id FROM messages m \
                 JOIN message_recipients r ON r.message_id = m.id \
                 WHERE r.recipient_id = ?1 \
             ) WHERE user_id != ?1 ORDER BY user_id",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
