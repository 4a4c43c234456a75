//! SQLite pool construction and schema migrations.
//!
//! The schema lives in `migrations/*.sql` and is applied in order with
//! [`sqlx::raw_sql`]. Every statement uses `IF NOT EXISTS`, so applying
//! the migrations is idempotent and safe to run at every startup.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// Identity schema: users, roles, teams, guardian links, permission grants.
const MIGRATION_IDENTITY: &str = include_str!("../migrations/001_identity.sql");

/// Messaging schema: messages and per-recipient delivery records.
const MIGRATION_MESSAGING: &str = include_str!("../migrations/002_messaging.sql");

/// Open (creating if missing) a file-backed SQLite database in WAL mode.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the database cannot be opened.
pub async fn connect(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);
    SqlitePoolOptions::new().connect_with(opts).await
}

/// Open an in-memory SQLite database (used by tests and the CLI dry runs).
///
/// The pool is capped at one connection so every query sees the same
/// in-memory database.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the database cannot be opened.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true)
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
}

/// Apply all schema migrations in order.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if any statement fails.
pub async fn apply_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(MIGRATION_IDENTITY).execute(pool).await?;
    sqlx::raw_sql(MIGRATION_MESSAGING).execute(pool).await?;
    tracing::debug!("schema migrations applied");
    Ok(())
}
