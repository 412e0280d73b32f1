use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StateError;

/// Counter row that hands out subscription ids.
pub(crate) const SUBSCRIPTION_ID_COUNTER: &str = "subscription_id";

// ============================================================================
// Database
// ============================================================================

/// SQLite-backed subscription store. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open (creating if needed) the database at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database, which is what the
    /// tests use.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InstanceLocked` if another process holds the
    /// database lock, `StateError::Migration` if the schema could not be
    /// created.
    pub async fn open(path: &str) -> Result<Self, StateError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Pre-create the file as 0600 so subscription URLs are not world-readable
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() {
                let _ = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path);
            }
        }

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StateError::from_sqlx)?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StateError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| match StateError::from_sqlx(e) {
            StateError::InstanceLocked => StateError::InstanceLocked,
            other => StateError::Migration(other.to_string()),
        })?;
        Ok(db)
    }

    /// Create tables inside one transaction; every statement is idempotent.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS counters (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO counters (name, value) VALUES (?, 0)")
            .bind(SUBSCRIPTION_ID_COUNTER)
            .execute(&mut *tx)
            .await?;

        // id is assigned from the counter, never by SQLite, so ids of removed
        // subscriptions are not reused
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY,
                source_url TEXT UNIQUE NOT NULL,
                display_title TEXT NOT NULL,
                custom_name TEXT,
                status TEXT NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'paused')),
                dedup_strategy TEXT NOT NULL
                    CHECK (dedup_strategy IN ('watermark', 'identity')),
                added_at TEXT NOT NULL,
                last_checked_at TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dedup_state (
                subscription_id INTEGER PRIMARY KEY
                    REFERENCES subscriptions(id) ON DELETE CASCADE,
                strategy TEXT NOT NULL,
                watermark TEXT,
                identities TEXT,
                updated_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_status ON subscriptions(status, id)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
