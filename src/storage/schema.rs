use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::broadcast;

use super::types::{is_lock_message, DatabaseError, StoreChange};

/// Capacity of the change channel. Slow subscribers observe `Lagged` and
/// rebuild from the store, so the exact number only bounds memory.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

const MEMORY_PATH: &str = ":memory:";

// ============================================================================
// Database
// ============================================================================

/// Handle to the local article cache.
///
/// Open exactly one per process at startup and pass clones to every consumer.
/// Clones share the connection pool and the change channel, so a write made
/// through any clone is observed by every subscriber.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    changes: broadcast::Sender<StoreChange>,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema could not be created.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release before returning SQLITE_BUSY.
        // foreign_keys is per-connection, so it goes on the connect options rather than a one-off PRAGMA.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000")
            .foreign_keys(true);
        // SQLite is single-writer; 5 connections covers the refresh writer plus
        // live-view readers. An in-memory database lives and dies with its
        // connection, so it gets exactly one that never expires.
        let pool_options = if path == MEMORY_PATH {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let db = Self { pool, changes };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Subscribe to committed store changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Publish a committed change. Having no subscribers is not an error.
    pub(crate) fn publish(&self, change: StoreChange) {
        let receivers = self.changes.send(change).unwrap_or(0);
        tracing::trace!(receivers, "Store change published");
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Articles: one row per URL-derived id. Category is a tag, not part of the key.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                article_id TEXT PRIMARY KEY NOT NULL,
                category TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                published_at INTEGER NOT NULL,
                url TEXT NOT NULL,
                url_to_image TEXT,
                source_name TEXT,
                fetched_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_category ON articles(category)")
            .execute(&mut *tx)
            .await?;

        // Serves both query_page and ids_to_keep: filter by category, newest first
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_category_published ON articles(category, published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // Bookmarks may name an article that is not cached (yet or any more),
        // so there is no REFERENCES clause; the cascade is the trigger below.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bookmarks (
                article_id TEXT PRIMARY KEY NOT NULL,
                bookmarked_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_bookmarks_article ON bookmarks(article_id)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_bookmarks_recent ON bookmarks(bookmarked_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // Deleting an article row drops its bookmark. Eviction never deletes
        // bookmarked rows, so this only fires for explicit deletes.
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS articles_bookmark_cascade AFTER DELETE ON articles BEGIN
                DELETE FROM bookmarks WHERE article_id = old.article_id;
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
