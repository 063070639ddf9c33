use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Persistent-store failures.
///
/// This is the only error class allowed to escape a feed refresh: it means the
/// local cache itself is broken, which is different from a stale network.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another instance of newscache appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// one of these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Change Notifications
// ============================================================================

/// A committed mutation of the store, published on the change channel.
///
/// Subscribers (live views, the bookmark id watcher) use these to decide when
/// to rebuild. Only committed work is ever published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// Rows were inserted or updated under `category`.
    ArticlesUpserted { category: String, count: usize },
    /// Eviction removed `removed` rows from `category`.
    ArticlesEvicted { category: String, removed: u64 },
    /// The bookmark set gained or lost an id.
    BookmarksChanged,
}

// ============================================================================
// Row Types
// ============================================================================

/// A normalized article ready to be written to the store.
///
/// Produced by the feed normalizer; the category tag is supplied at upsert time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub article_id: String,
    pub title: String,
    pub author: String,
    /// Epoch milliseconds
    pub published_at: i64,
    pub url: String,
    pub image_url: Option<String>,
    pub source_name: Option<String>,
}

/// Internal row type for article queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub article_id: String,
    pub category: String,
    pub title: String,
    pub author: String,
    pub published_at: i64,
    pub url: String,
    pub url_to_image: Option<String>,
    pub source_name: Option<String>,
    pub fetched_at: i64,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            article_id: self.article_id,
            category: self.category,
            title: Arc::from(self.title),
            author: Arc::from(self.author),
            published_at: self.published_at,
            url: Arc::from(self.url),
            image_url: self.url_to_image.map(Arc::from),
            source_name: self.source_name.map(Arc::from),
            fetched_at: self.fetched_at,
        }
    }
}

/// Column list shared by every article query, in `ArticleDbRow` order.
pub(crate) const ARTICLE_COLUMNS: &str = "article_id, category, title, author, published_at, \
     url, url_to_image, source_name, fetched_at";

// ============================================================================
// Data Structures
// ============================================================================

/// A cached article.
///
/// `article_id` is a pure function of `url` (see `feed::article_id_for_url`), so
/// one URL always maps to one row no matter how many categories fetched it.
/// String fields use `Arc<str>` so view items can share them without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub article_id: String,
    /// Category tag from the most recent upsert
    pub category: String,
    pub title: Arc<str>,
    pub author: Arc<str>,
    /// Epoch milliseconds, the ordering key
    pub published_at: i64,
    pub url: Arc<str>,
    pub image_url: Option<Arc<str>>,
    pub source_name: Option<Arc<str>>,
    /// Epoch milliseconds of the last local write; informational only
    pub fetched_at: i64,
}

/// Row counts from one committed refresh transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub upserted: usize,
    pub evicted: u64,
}
