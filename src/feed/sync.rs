use super::client::{FeedClient, FetchError};
use super::normalize::normalize_articles;
use crate::storage::{Database, DatabaseError, MAX_KEEP_PER_CATEGORY};

/// How a refresh cycle ended, when the store itself is healthy.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// The remote page was committed and the category evicted.
    Updated {
        fetched: usize,
        upserted: usize,
        evicted: u64,
    },
    /// The fetch failed; the cache was left untouched and stays authoritative.
    Stale { error: FetchError },
}

impl RefreshOutcome {
    pub fn is_stale(&self) -> bool {
        matches!(self, RefreshOutcome::Stale { .. })
    }

    /// User-facing note for a stale refresh, `None` when the cache was updated.
    pub fn error_message(&self) -> Option<String> {
        match self {
            RefreshOutcome::Updated { .. } => None,
            RefreshOutcome::Stale { error } => Some(format!("Refresh failed: {error}")),
        }
    }
}

/// Pulls one category from the remote feed into the store.
///
/// Network failures, bad payloads and bad dates never escape [`refresh`]:
/// they come back as [`RefreshOutcome::Stale`] and the cached rows remain the
/// visible truth. Only a broken store is an `Err`.
///
/// [`refresh`]: FeedSynchronizer::refresh
#[derive(Clone)]
pub struct FeedSynchronizer {
    db: Database,
    client: FeedClient,
    keep: usize,
}

impl FeedSynchronizer {
    pub fn new(db: Database, client: FeedClient, keep: usize) -> Self {
        Self {
            db,
            client,
            keep: keep.clamp(1, MAX_KEEP_PER_CATEGORY),
        }
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Fetch, normalize, then upsert and evict in one transaction.
    ///
    /// Safe to cancel at any await point: an aborted refresh commits nothing.
    pub async fn refresh(&self, category: &str) -> Result<RefreshOutcome, DatabaseError> {
        tracing::debug!(category = %category, "Refreshing category");

        let response = match self.client.fetch_category(category).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(category = %category, error = %error, "Refresh failed, keeping cached rows");
                return Ok(RefreshOutcome::Stale { error });
            }
        };

        if let Some(echoed) = response.category.as_deref() {
            if echoed != category {
                tracing::debug!(requested = %category, echoed = %echoed, "Feed echoed a different category");
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        let articles = normalize_articles(&response.articles, now);

        let stats = self
            .db
            .complete_category_refresh(category, &articles, self.keep)
            .await
            .map_err(|e| {
                tracing::error!(category = %category, error = %e, "Failed to commit refresh");
                e
            })?;

        tracing::info!(
            category = %category,
            fetched = response.articles.len(),
            upserted = stats.upserted,
            evicted = stats.evicted,
            "Category refreshed"
        );

        Ok(RefreshOutcome::Updated {
            fetched: response.articles.len(),
            upserted: stats.upserted,
            evicted: stats.evicted,
        })
    }
}
