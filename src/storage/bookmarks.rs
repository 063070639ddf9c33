use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, watch};

use super::schema::Database;
use super::types::{Article, ArticleDbRow, DatabaseError, StoreChange};

/// Live view of the bookmarked id set
pub type BookmarkIds = watch::Receiver<Arc<HashSet<String>>>;

impl Database {
    // ========================================================================
    // Bookmark Mutations
    // ========================================================================

    /// Bookmark an article, returns `true` if it was not bookmarked before.
    ///
    /// The article does not have to be cached: a bookmark may precede or
    /// outlive its article row.
    pub async fn add_bookmark(&self, article_id: &str) -> Result<bool, DatabaseError> {
        let now = chrono::Utc::now().timestamp_millis();
        let result = sqlx::query(
            "INSERT INTO bookmarks (article_id, bookmarked_at) VALUES (?, ?) \
             ON CONFLICT(article_id) DO NOTHING",
        )
        .bind(article_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let added = result.rows_affected() > 0;
        if added {
            self.publish(StoreChange::BookmarksChanged);
        }
        Ok(added)
    }

    /// Remove a bookmark, returns `true` if one existed.
    pub async fn remove_bookmark(&self, article_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM bookmarks WHERE article_id = ?")
            .bind(article_id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            self.publish(StoreChange::BookmarksChanged);
        }
        Ok(removed)
    }

    /// Atomically flip the bookmark for `article_id`, returning the new state.
    pub async fn toggle_bookmark(&self, article_id: &str) -> Result<bool, DatabaseError> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM bookmarks WHERE article_id = ?")
            .bind(article_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        if !removed {
            sqlx::query("INSERT INTO bookmarks (article_id, bookmarked_at) VALUES (?, ?)")
                .bind(article_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        self.publish(StoreChange::BookmarksChanged);
        Ok(!removed)
    }

    // ========================================================================
    // Bookmark Queries
    // ========================================================================

    /// Whether `article_id` is bookmarked.
    pub async fn is_bookmarked(&self, article_id: &str) -> Result<bool, DatabaseError> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM bookmarks WHERE article_id = ?)")
                .bind(article_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    /// Every bookmarked id, including ids whose article is not cached.
    pub async fn bookmarked_ids(&self) -> Result<HashSet<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT article_id FROM bookmarks")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Number of bookmarks, including ones whose article is not cached.
    pub async fn count_bookmarks(&self) -> Result<i64, DatabaseError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bookmarks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// One page of bookmarked articles, most recently bookmarked first.
    ///
    /// Bookmarks without a cached article are skipped until the article
    /// shows up again.
    pub async fn bookmarked_articles_page(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Article>, DatabaseError> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(
            r#"
            SELECT a.article_id, a.category, a.title, a.author, a.published_at,
                   a.url, a.url_to_image, a.source_name, a.fetched_at
            FROM articles a
            INNER JOIN bookmarks b ON a.article_id = b.article_id
            ORDER BY b.bookmarked_at DESC, b.rowid DESC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(limit.clamp(0, super::articles::MAX_PAGE_SIZE))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    // ========================================================================
    // Live Bookmark Set
    // ========================================================================

    /// Observe the bookmarked id set.
    ///
    /// The receiver starts with the current set and sees a new value whenever
    /// the persisted set actually changes. The background watcher exits once
    /// every receiver has been dropped.
    pub async fn watch_bookmarked_ids(&self) -> Result<BookmarkIds, DatabaseError> {
        // Subscribe before the initial read so no change can fall in between.
        let mut changes = self.subscribe();
        let initial = self.bookmarked_ids().await?;
        let (tx, rx) = watch::channel(Arc::new(initial));
        let db = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    change = changes.recv() => match change {
                        Ok(StoreChange::BookmarksChanged) | Err(RecvError::Lagged(_)) => {}
                        Ok(_) => continue,
                        Err(RecvError::Closed) => break,
                    },
                }

                match db.bookmarked_ids().await {
                    Ok(ids) => {
                        tx.send_if_modified(|current| {
                            if **current == ids {
                                return false;
                            }
                            *current = Arc::new(ids);
                            true
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to reload bookmarked ids");
                    }
                }
            }
            tracing::debug!("Bookmark id watcher stopped");
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, NewArticle, StoreChange};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::time::Duration;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_article(n: i64) -> NewArticle {
        NewArticle {
            article_id: format!("id-{n}"),
            title: format!("Article {n}"),
            author: "Unknown".to_string(),
            published_at: n,
            url: format!("https://example.com/{n}"),
            image_url: None,
            source_name: None,
        }
    }

    #[tokio::test]
    async fn test_add_and_remove_are_idempotent() {
        let db = test_db().await;

        assert!(db.add_bookmark("id-1").await.unwrap());
        assert!(!db.add_bookmark("id-1").await.unwrap());
        assert!(db.is_bookmarked("id-1").await.unwrap());
        assert_eq!(db.count_bookmarks().await.unwrap(), 1);

        assert!(db.remove_bookmark("id-1").await.unwrap());
        assert!(!db.remove_bookmark("id-1").await.unwrap());
        assert!(!db.is_bookmarked("id-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_bookmark_round_trip_restores_membership() {
        let db = test_db().await;
        db.add_bookmark("keep-me").await.unwrap();
        let before = db.bookmarked_ids().await.unwrap();

        db.add_bookmark("id-7").await.unwrap();
        db.remove_bookmark("id-7").await.unwrap();

        assert_eq!(db.bookmarked_ids().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_toggle_flips_state() {
        let db = test_db().await;

        assert!(db.toggle_bookmark("id-1").await.unwrap());
        assert!(db.is_bookmarked("id-1").await.unwrap());
        assert!(!db.toggle_bookmark("id-1").await.unwrap());
        assert!(!db.is_bookmarked("id-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_bookmark_without_article_is_excluded_from_join() {
        let db = test_db().await;
        db.add_bookmark("id-1").await.unwrap();

        assert!(db.bookmarked_articles_page(0, 20).await.unwrap().is_empty());

        // The article shows up later and joins the bookmarked view
        db.upsert_articles("tech", &[test_article(1)]).await.unwrap();
        let page = db.bookmarked_articles_page(0, 20).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].article_id, "id-1");
    }

    #[tokio::test]
    async fn test_bookmarked_page_orders_by_bookmark_time() {
        let db = test_db().await;
        db.upsert_articles("tech", &[test_article(1), test_article(2), test_article(3)])
            .await
            .unwrap();

        db.add_bookmark("id-2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        db.add_bookmark("id-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        db.add_bookmark("id-3").await.unwrap();

        let page = db.bookmarked_articles_page(0, 20).await.unwrap();
        let ids: Vec<&str> = page.iter().map(|a| a.article_id.as_str()).collect();
        assert_eq!(ids, vec!["id-3", "id-1", "id-2"]);

        let second = db.bookmarked_articles_page(1, 1).await.unwrap();
        assert_eq!(second[0].article_id, "id-1");
    }

    #[tokio::test]
    async fn test_only_real_changes_publish() {
        let db = test_db().await;
        let mut rx = db.subscribe();

        db.add_bookmark("id-1").await.unwrap();
        db.add_bookmark("id-1").await.unwrap();
        db.remove_bookmark("missing").await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), StoreChange::BookmarksChanged);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watch_bookmarked_ids_follows_store() {
        let db = test_db().await;
        db.add_bookmark("id-1").await.unwrap();

        let mut ids = db.watch_bookmarked_ids().await.unwrap();
        assert_eq!(**ids.borrow(), HashSet::from(["id-1".to_string()]));

        db.add_bookmark("id-2").await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            ids.wait_for(|set| set.contains("id-2")),
        )
        .await
        .expect("watcher did not observe the new bookmark")
        .unwrap();

        db.remove_bookmark("id-1").await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            ids.wait_for(|set| !set.contains("id-1")),
        )
        .await
        .expect("watcher did not observe the removal")
        .unwrap();
    }
}
