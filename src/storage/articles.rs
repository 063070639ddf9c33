use sqlx::{QueryBuilder, SqliteConnection};

use super::schema::Database;
use super::types::{
    Article, ArticleDbRow, DatabaseError, NewArticle, StoreChange, ARTICLE_COLUMNS,
};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of rows any single page query returns (OOM protection)
pub const MAX_PAGE_SIZE: i64 = 500;

/// Rows per INSERT statement. 9 columns * 50 = 450 bind parameters.
const UPSERT_BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Insert-or-update articles under `category`, returns the number of rows written.
    ///
    /// Keyed by `article_id`. An existing row keeps its rowid (and any bookmark
    /// pointing at it); every other column, including the category tag, takes
    /// the incoming value. Re-applying the same batch leaves the table as it was
    /// apart from `fetched_at`.
    pub async fn upsert_articles(
        &self,
        category: &str,
        articles: &[NewArticle],
    ) -> Result<usize, DatabaseError> {
        if articles.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        let written = upsert_in(&mut *tx, category, articles, now).await?;
        tx.commit().await?;

        self.publish(StoreChange::ArticlesUpserted {
            category: category.to_string(),
            count: written,
        });
        Ok(written)
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// One page of a category, newest first, optionally filtered by a search query.
    ///
    /// A non-blank `search_query` keeps rows whose title, author or source name
    /// contains it (case-insensitive; `%`, `_` and `\` match literally).
    /// Rows with equal `published_at` come back in insertion order.
    /// `limit` is clamped to [`MAX_PAGE_SIZE`]; page through larger sets.
    pub async fn query_page(
        &self,
        category: &str,
        search_query: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Article>, DatabaseError> {
        let limit = limit.clamp(0, MAX_PAGE_SIZE);
        let offset = offset.max(0);
        let query = search_query.trim();

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("SELECT ");
        builder.push(ARTICLE_COLUMNS);
        builder.push(" FROM articles WHERE category = ");
        builder.push_bind(category);

        if !query.is_empty() {
            let pattern = like_pattern(query);
            builder.push(" AND (title LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" ESCAPE '\\' OR author LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" ESCAPE '\\' OR source_name LIKE ");
            builder.push_bind(pattern);
            builder.push(" ESCAPE '\\')");
        }

        builder.push(" ORDER BY published_at DESC, rowid ASC LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let rows: Vec<ArticleDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    /// Get a single article by id.
    pub async fn get_article(&self, article_id: &str) -> Result<Option<Article>, DatabaseError> {
        let row = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE article_id = ?"
        ))
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ArticleDbRow::into_article))
    }

    /// Number of rows currently tagged with `category`.
    pub async fn count_articles(&self, category: &str) -> Result<i64, DatabaseError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE category = ?")
            .bind(category)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

/// Upsert inside a caller-owned transaction.
///
/// Uses `ON CONFLICT DO UPDATE` rather than `INSERT OR REPLACE`: REPLACE
/// deletes the old row first, which would fire the bookmark cascade and
/// reorder ties.
pub(crate) async fn upsert_in(
    conn: &mut SqliteConnection,
    category: &str,
    articles: &[NewArticle],
    now: i64,
) -> Result<usize, sqlx::Error> {
    let mut written = 0;

    for chunk in articles.chunks(UPSERT_BATCH_SIZE) {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "INSERT INTO articles (article_id, category, title, author, published_at, url, \
             url_to_image, source_name, fetched_at) ",
        );

        builder.push_values(chunk, |mut b, article| {
            b.push_bind(&article.article_id)
                .push_bind(category)
                .push_bind(&article.title)
                .push_bind(&article.author)
                .push_bind(article.published_at)
                .push_bind(&article.url)
                .push_bind(&article.image_url)
                .push_bind(&article.source_name)
                .push_bind(now);
        });

        builder.push(
            " ON CONFLICT(article_id) DO UPDATE SET \
             category = excluded.category, \
             title = excluded.title, \
             author = excluded.author, \
             published_at = excluded.published_at, \
             url = excluded.url, \
             url_to_image = excluded.url_to_image, \
             source_name = excluded.source_name, \
             fetched_at = excluded.fetched_at",
        );

        let result = builder.build().execute(&mut *conn).await?;
        written += result.rows_affected() as usize;
    }

    Ok(written)
}

/// Build a `LIKE` pattern that matches `query` as a literal substring.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::{like_pattern, MAX_PAGE_SIZE};
    use crate::storage::{Database, NewArticle, StoreChange};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_article(n: i64) -> NewArticle {
        NewArticle {
            article_id: format!("id-{n}"),
            title: format!("Article {n}"),
            author: "Jane Doe".to_string(),
            published_at: n * 1000,
            url: format!("https://example.com/{n}"),
            image_url: None,
            source_name: Some("Example Times".to_string()),
        }
    }

    #[tokio::test]
    async fn test_upsert_inserts_rows() {
        let db = test_db().await;

        let written = db
            .upsert_articles("tech", &[test_article(1), test_article(2)])
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(db.count_articles("tech").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_same_id_last_write_wins() {
        let db = test_db().await;
        db.upsert_articles("tech", &[test_article(1)]).await.unwrap();

        let mut updated = test_article(1);
        updated.title = "Updated headline".to_string();
        updated.author = "Someone Else".to_string();
        db.upsert_articles("tech", &[updated]).await.unwrap();

        assert_eq!(db.count_articles("tech").await.unwrap(), 1);
        let article = db.get_article("id-1").await.unwrap().unwrap();
        assert_eq!(&*article.title, "Updated headline");
        assert_eq!(&*article.author, "Someone Else");
    }

    #[tokio::test]
    async fn test_upsert_retags_category() {
        let db = test_db().await;
        db.upsert_articles("general", &[test_article(1)]).await.unwrap();
        db.upsert_articles("sports", &[test_article(1)]).await.unwrap();

        assert_eq!(db.count_articles("general").await.unwrap(), 0);
        assert_eq!(db.count_articles("sports").await.unwrap(), 1);
        let article = db.get_article("id-1").await.unwrap().unwrap();
        assert_eq!(article.category, "sports");
    }

    #[tokio::test]
    async fn test_upsert_duplicate_ids_in_one_batch() {
        let db = test_db().await;
        let mut second = test_article(1);
        second.title = "Second copy".to_string();

        db.upsert_articles("tech", &[test_article(1), second])
            .await
            .unwrap();

        assert_eq!(db.count_articles("tech").await.unwrap(), 1);
        let article = db.get_article("id-1").await.unwrap().unwrap();
        assert_eq!(&*article.title, "Second copy");
    }

    #[tokio::test]
    async fn test_upsert_empty_is_noop() {
        let db = test_db().await;
        let mut rx = db.subscribe();

        assert_eq!(db.upsert_articles("tech", &[]).await.unwrap(), 0);
        assert!(rx.try_recv().is_err(), "empty upsert must not publish");
    }

    #[tokio::test]
    async fn test_upsert_publishes_change() {
        let db = test_db().await;
        let mut rx = db.subscribe();

        db.upsert_articles("tech", &[test_article(1)]).await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            StoreChange::ArticlesUpserted {
                category: "tech".to_string(),
                count: 1
            }
        );
    }

    #[tokio::test]
    async fn test_upsert_large_batch_spans_chunks() {
        let db = test_db().await;
        let articles: Vec<_> = (1..=120).map(test_article).collect();

        let written = db.upsert_articles("tech", &articles).await.unwrap();

        assert_eq!(written, 120);
        assert_eq!(db.count_articles("tech").await.unwrap(), 120);
    }

    #[tokio::test]
    async fn test_query_page_orders_newest_first() {
        let db = test_db().await;
        db.upsert_articles("tech", &[test_article(1), test_article(3), test_article(2)])
            .await
            .unwrap();

        let page = db.query_page("tech", "", 0, 10).await.unwrap();
        let ids: Vec<&str> = page.iter().map(|a| a.article_id.as_str()).collect();
        assert_eq!(ids, vec!["id-3", "id-2", "id-1"]);
    }

    #[tokio::test]
    async fn test_query_page_ties_keep_insertion_order() {
        let db = test_db().await;
        let mut a = test_article(1);
        let mut b = test_article(2);
        a.published_at = 5000;
        b.published_at = 5000;
        db.upsert_articles("tech", &[a, b]).await.unwrap();

        let first = db.query_page("tech", "", 0, 10).await.unwrap();
        let second = db.query_page("tech", "", 0, 10).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].article_id, "id-1");
    }

    #[tokio::test]
    async fn test_query_page_offset_and_limit() {
        let db = test_db().await;
        let articles: Vec<_> = (1..=10).map(test_article).collect();
        db.upsert_articles("tech", &articles).await.unwrap();

        let page = db.query_page("tech", "", 3, 4).await.unwrap();
        let ids: Vec<&str> = page.iter().map(|a| a.article_id.as_str()).collect();
        assert_eq!(ids, vec!["id-7", "id-6", "id-5", "id-4"]);

        let past_end = db.query_page("tech", "", 50, 4).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn test_query_page_clamps_limit_to_max_page_size() {
        let db = test_db().await;
        let rows: Vec<_> = (1..=(MAX_PAGE_SIZE + 20)).map(test_article).collect();
        db.upsert_articles("tech", &rows).await.unwrap();

        let first = db.query_page("tech", "", 0, 10_000).await.unwrap();
        assert_eq!(first.len(), MAX_PAGE_SIZE as usize);

        let rest = db.query_page("tech", "", MAX_PAGE_SIZE, 10_000).await.unwrap();
        assert_eq!(rest.len(), 20);
    }

    #[tokio::test]
    async fn test_query_page_filters_by_category() {
        let db = test_db().await;
        db.upsert_articles("tech", &[test_article(1)]).await.unwrap();
        db.upsert_articles("health", &[test_article(2)]).await.unwrap();

        let page = db.query_page("tech", "", 0, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].article_id, "id-1");
    }

    #[tokio::test]
    async fn test_search_matches_title_author_and_source_case_insensitively() {
        let db = test_db().await;
        let mut by_title = test_article(1);
        by_title.title = "Smithsonian reopens".to_string();
        let mut by_author = test_article(2);
        by_author.author = "Anna SMITH".to_string();
        let mut by_source = test_article(3);
        by_source.source_name = Some("Blacksmith Weekly".to_string());
        let mut no_match = test_article(4);
        no_match.source_name = None;

        db.upsert_articles("tech", &[by_title, by_author, by_source, no_match])
            .await
            .unwrap();

        let page = db.query_page("tech", "smith", 0, 10).await.unwrap();
        let mut ids: Vec<&str> = page.iter().map(|a| a.article_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["id-1", "id-2", "id-3"]);
    }

    #[tokio::test]
    async fn test_search_blank_query_returns_all() {
        let db = test_db().await;
        db.upsert_articles("tech", &[test_article(1), test_article(2)])
            .await
            .unwrap();

        assert_eq!(db.query_page("tech", "", 0, 10).await.unwrap().len(), 2);
        assert_eq!(db.query_page("tech", "   ", 0, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_wildcards_are_literal() {
        let db = test_db().await;
        let mut percent = test_article(1);
        percent.title = "Rates up 5% today".to_string();
        db.upsert_articles("tech", &[percent, test_article(2)])
            .await
            .unwrap();

        let page = db.query_page("tech", "5%", 0, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].article_id, "id-1");

        let underscore = db.query_page("tech", "_", 0, 10).await.unwrap();
        assert!(underscore.is_empty());
    }

    #[tokio::test]
    async fn test_get_article_missing() {
        let db = test_db().await;
        assert!(db.get_article("nope").await.unwrap().is_none());
    }

    #[test]
    fn test_like_pattern_escapes() {
        assert_eq!(like_pattern("abc"), "%abc%");
        assert_eq!(like_pattern("5%_\\"), "%5\\%\\_\\\\%");
    }
}
