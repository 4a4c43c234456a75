//! Identity and role lookups consumed by the messaging engine.
//!
//! The wider platform owns user records, role profiles, team membership
//! and guardian links; the engine only ever reads them. The [`Directory`]
//! trait is the seam, [`SqliteDirectory`] the default implementation over
//! the shared platform database.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Errors from directory lookups.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An invalid role value was read from the database.
    #[error("invalid role value: {0:?}")]
    InvalidRole(String),
}

/// A role profile a user may hold. Users may hold several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Program staff — elevated messaging privileges.
    Staff,
    /// Adult mentor paired with mentees.
    Mentor,
    /// Youth participant.
    Mentee,
    /// Parent or guardian linked to one or more mentees.
    Guardian,
    /// Event volunteer.
    Volunteer,
}

impl Role {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Mentor => "mentor",
            Self::Mentee => "mentee",
            Self::Guardian => "guardian",
            Self::Volunteer => "volunteer",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised role.
    pub fn parse(s: &str) -> Result<Self, DirectoryError> {
        match s {
            "staff" => Ok(Self::Staff),
            "mentor" => Ok(Self::Mentor),
            "mentee" => Ok(Self::Mentee),
            "guardian" => Ok(Self::Guardian),
            "volunteer" => Ok(Self::Volunteer),
            other => Err(DirectoryError::InvalidRole(other.to_owned())),
        }
    }
}

/// A mentee team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Database row id.
    pub id: i64,
    /// Team name.
    pub name: String,
}

/// Identity/role lookup interface.
///
/// All implementations must be `Send + Sync` to allow shared use across
/// async task boundaries.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Returns `true` if a user with this id exists.
    async fn user_exists(&self, user_id: i64) -> Result<bool, DirectoryError>;

    /// Display name for a user, if the user exists.
    async fn display_name(&self, user_id: i64) -> Result<Option<String>, DirectoryError>;

    /// All user ids in the platform.
    async fn all_users(&self) -> Result<Vec<i64>, DirectoryError>;

    /// Users holding the given role profile.
    async fn users_with_role(&self, role: Role) -> Result<Vec<i64>, DirectoryError>;

    /// Returns `true` if the user holds the given role profile.
    async fn has_role(&self, user_id: i64, role: Role) -> Result<bool, DirectoryError>;

    /// Mentees whose mentee profile belongs to the given team.
    async fn team_mentees(&self, team_id: i64) -> Result<Vec<i64>, DirectoryError>;

    /// Guardians linked to the given mentee.
    async fn guardians_of(&self, mentee_id: i64) -> Result<Vec<i64>, DirectoryError>;

    /// All teams, for compose screens offering `group:team:<id>` tokens.
    async fn teams(&self) -> Result<Vec<Team>, DirectoryError>;
}

/// Directory implementation over the shared platform SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    /// Create a directory over the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for SqliteDirectory {
    async fn user_exists(&self, user_id: i64) -> Result<bool, DirectoryError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn display_name(&self, user_id: i64) -> Result<Option<String>, DirectoryError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT display_name FROM users WHERE id = ?1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(name,)| name))
    }

    async fn all_users(&self) -> Result<Vec<i64>, DirectoryError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn users_with_role(&self, role: Role) -> Result<Vec<i64>, DirectoryError> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT user_id FROM role_profiles WHERE role = ?1 ORDER BY user_id")
                .bind(role.as_str())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn has_role(&self, user_id: i64, role: Role) -> Result<bool, DirectoryError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM role_profiles WHERE user_id = ?1 AND role = ?2")
                .bind(user_id)
                .bind(role.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn team_mentees(&self, team_id: i64) -> Result<Vec<i64>, DirectoryError> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT user_id FROM mentee_profiles WHERE team_id = ?1 ORDER BY user_id")
                .bind(team_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn guardians_of(&self, mentee_id: i64) -> Result<Vec<i64>, DirectoryError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT guardian_id FROM guardian_links WHERE mentee_id = ?1 ORDER BY guardian_id",
        )
        .bind(mentee_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn teams(&self) -> Result<Vec<Team>, DirectoryError> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM teams ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name)| Team { id, name })
            .collect())
    }
}
