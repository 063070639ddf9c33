use sqlx::{QueryBuilder, SqliteConnection};

use super::articles::upsert_in;
use super::schema::Database;
use super::types::{DatabaseError, NewArticle, RefreshStats, StoreChange};

/// Rows kept per category after a refresh, not counting bookmarked rows
pub const DEFAULT_KEEP_PER_CATEGORY: usize = 100;

/// Upper bound on the keep-set; every kept id is one bind parameter in
/// `delete_except`.
pub const MAX_KEEP_PER_CATEGORY: usize = 10_000;

impl Database {
    // ========================================================================
    // Eviction Primitives
    // ========================================================================

    /// The `limit` most recent article ids in `category`, newest first.
    pub async fn ids_to_keep(
        &self,
        category: &str,
        limit: usize,
    ) -> Result<Vec<String>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(ids_to_keep_in(&mut *conn, category, limit).await?)
    }

    /// Delete every row in `category` that is neither in `keep_ids` nor bookmarked.
    ///
    /// Returns the number of rows removed.
    pub async fn delete_except(
        &self,
        category: &str,
        keep_ids: &[String],
    ) -> Result<u64, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let removed = delete_except_in(&mut *conn, category, keep_ids).await?;
        drop(conn);

        if removed > 0 {
            self.publish(StoreChange::ArticlesEvicted {
                category: category.to_string(),
                removed,
            });
        }
        Ok(removed)
    }

    // ========================================================================
    // Eviction Policy
    // ========================================================================

    /// Bound `category` to `keep` rows plus any bookmarked rows.
    ///
    /// Both phases run in one transaction, so a concurrent upsert cannot slip
    /// between computing the keep-set and deleting by exclusion.
    pub async fn evict_category(&self, category: &str, keep: usize) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let removed = evict_in(&mut *tx, category, keep).await?;
        tx.commit().await?;

        if removed > 0 {
            tracing::debug!(category = %category, removed, "Evicted cached articles");
            self.publish(StoreChange::ArticlesEvicted {
                category: category.to_string(),
                removed,
            });
        }
        Ok(removed)
    }

    /// Commit one refresh cycle: upsert `articles` under `category`, then evict.
    ///
    /// Upsert and eviction share a transaction. Dropping the future before it
    /// completes (task abort) rolls back both, so there is never an eviction
    /// without its upsert batch or the other way round.
    pub async fn complete_category_refresh(
        &self,
        category: &str,
        articles: &[NewArticle],
        keep: usize,
    ) -> Result<RefreshStats, DatabaseError> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let upserted = upsert_in(&mut *tx, category, articles, now).await?;
        let evicted = evict_in(&mut *tx, category, keep).await?;

        tx.commit().await?;

        if upserted > 0 {
            self.publish(StoreChange::ArticlesUpserted {
                category: category.to_string(),
                count: upserted,
            });
        }
        if evicted > 0 {
            self.publish(StoreChange::ArticlesEvicted {
                category: category.to_string(),
                removed: evicted,
            });
        }

        Ok(RefreshStats { upserted, evicted })
    }
}

/// Two-phase eviction inside a caller-owned transaction.
///
/// Phase 1 reads the keep-set, phase 2 deletes by exclusion against that
/// explicit id list. This must stay two statements: `ORDER BY ... LIMIT`
/// inside a `NOT IN` subquery is not evaluated reliably across SQLite versions.
async fn evict_in(
    conn: &mut SqliteConnection,
    category: &str,
    keep: usize,
) -> Result<u64, sqlx::Error> {
    let keep = keep.min(MAX_KEEP_PER_CATEGORY);
    let keep_ids = ids_to_keep_in(&mut *conn, category, keep).await?;
    if keep_ids.len() < keep {
        // Fewer rows than the limit: nothing can be over the bound.
        return Ok(0);
    }
    delete_except_in(conn, category, &keep_ids).await
}

async fn ids_to_keep_in(
    conn: &mut SqliteConnection,
    category: &str,
    limit: usize,
) -> Result<Vec<String>, sqlx::Error> {
    let limit = limit.min(MAX_KEEP_PER_CATEGORY) as i64;
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT article_id FROM articles
        WHERE category = ?
        ORDER BY published_at DESC, rowid ASC
        LIMIT ?
    "#,
    )
    .bind(category)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

async fn delete_except_in(
    conn: &mut SqliteConnection,
    category: &str,
    keep_ids: &[String],
) -> Result<u64, sqlx::Error> {
    let mut builder: QueryBuilder<sqlx::Sqlite> =
        QueryBuilder::new("DELETE FROM articles WHERE category = ");
    builder.push_bind(category);
    builder.push(
        " AND NOT EXISTS (SELECT 1 FROM bookmarks WHERE bookmarks.article_id = articles.article_id)",
    );

    if !keep_ids.is_empty() {
        builder.push(" AND article_id NOT IN (");
        let mut separated = builder.separated(", ");
        for id in keep_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
    }

    let result = builder.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}
