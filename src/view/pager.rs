use std::collections::HashSet;

use super::item::ArticleItem;
use crate::storage::{Article, Database, DatabaseError, StoreChange, MAX_PAGE_SIZE};

/// Windowing parameters for a live view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingConfig {
    /// Rows fetched per `load_more`
    pub page_size: usize,
    /// Load the next page once an accessed index is this close to the end
    pub prefetch_distance: usize,
    /// Rows fetched when a view (re)starts
    pub initial_load_size: usize,
}

impl PagingConfig {
    pub fn new(page_size: usize, prefetch_distance: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            page_size,
            prefetch_distance,
            initial_load_size: page_size.saturating_mul(3),
        }
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self::new(20, 10)
    }
}

/// What a live view shows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewKey {
    /// One category, optionally filtered by a search query
    Category { category: String, query: String },
    /// Bookmarked articles, most recently bookmarked first
    Bookmarks,
}

impl ViewKey {
    /// Category key with a trimmed query, so `"rust "` and `"rust"` are one key.
    pub fn category(category: &str, query: &str) -> Self {
        ViewKey::Category {
            category: category.to_string(),
            query: query.trim().to_string(),
        }
    }

    /// Whether a committed store change can alter this view's rows.
    ///
    /// Bookmark changes are not handled here: views follow the bookmark id
    /// set through their own watch channel.
    pub fn is_invalidated_by(&self, change: &StoreChange) -> bool {
        match (self, change) {
            // Upserts may re-tag a row into or out of any category
            (_, StoreChange::ArticlesUpserted { .. }) => true,
            (ViewKey::Category { category, .. }, StoreChange::ArticlesEvicted { category: c, .. }) => {
                category == c
            }
            // Eviction never removes a bookmarked row
            (ViewKey::Bookmarks, StoreChange::ArticlesEvicted { .. }) => false,
            (_, StoreChange::BookmarksChanged) => false,
        }
    }
}

impl std::fmt::Display for ViewKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewKey::Category { category, query } if query.is_empty() => write!(f, "{category}"),
            ViewKey::Category { category, query } => write!(f, "{category}?q={query}"),
            ViewKey::Bookmarks => write!(f, "bookmarks"),
        }
    }
}

/// One generation of a windowed query.
///
/// A pager only ever grows its window. When the underlying rows change the
/// live view throws the pager away and builds a fresh one.
pub struct Pager {
    db: Database,
    key: ViewKey,
    config: PagingConfig,
    items: Vec<ArticleItem>,
    end_reached: bool,
}

impl Pager {
    pub fn new(db: Database, key: ViewKey, config: PagingConfig) -> Self {
        Self {
            db,
            key,
            config,
            items: Vec::new(),
            end_reached: false,
        }
    }

    pub fn items(&self) -> &[ArticleItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn end_reached(&self) -> bool {
        self.end_reached
    }

    /// Load the first window: at least `initial_load_size` rows, and at least
    /// `min_len` so a rebuild never shrinks what the reader already had.
    pub async fn load_initial(
        &mut self,
        bookmarks: &HashSet<String>,
        min_len: usize,
    ) -> Result<(), DatabaseError> {
        let want = self.config.initial_load_size.max(min_len).max(1);
        self.load(bookmarks, want).await.map(|_| ())
    }

    /// Append one page. Returns the number of rows added.
    pub async fn load_next(&mut self, bookmarks: &HashSet<String>) -> Result<usize, DatabaseError> {
        if self.end_reached {
            return Ok(0);
        }
        self.load(bookmarks, self.config.page_size).await
    }

    /// Whether reading `index` should trigger the next page.
    pub fn should_prefetch(&self, index: usize) -> bool {
        !self.end_reached && index.saturating_add(self.config.prefetch_distance) >= self.items.len()
    }

    async fn load(&mut self, bookmarks: &HashSet<String>, count: usize) -> Result<usize, DatabaseError> {
        let mut remaining = count;
        let mut added = 0;

        while remaining > 0 && !self.end_reached {
            let limit = remaining.min(MAX_PAGE_SIZE as usize);
            let rows = self.fetch(self.items.len() as i64, limit as i64).await?;
            if rows.len() < limit {
                self.end_reached = true;
            }
            added += rows.len();
            remaining -= limit;

            let all_bookmarked = matches!(self.key, ViewKey::Bookmarks);
            self.items.extend(rows.into_iter().map(|article| {
                let is_bookmarked = all_bookmarked || bookmarks.contains(&article.article_id);
                ArticleItem::from_article(article, is_bookmarked)
            }));
        }

        Ok(added)
    }

    async fn fetch(&self, offset: i64, limit: i64) -> Result<Vec<Article>, DatabaseError> {
        match &self.key {
            ViewKey::Category { category, query } => {
                self.db.query_page(category, query, offset, limit).await
            }
            ViewKey::Bookmarks => self.db.bookmarked_articles_page(offset, limit).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewArticle;
    use pretty_assertions::assert_eq;

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

    async fn seeded(n: i64) -> Database {
        let db = Database::open(":memory:").await.unwrap();
        let rows: Vec<_> = (1..=n).map(test_article).collect();
        db.upsert_articles("tech", &rows).await.unwrap();
        db
    }

    fn small_pages() -> PagingConfig {
        PagingConfig {
            page_size: 5,
            prefetch_distance: 2,
            initial_load_size: 10,
        }
    }

    #[test]
    fn test_default_config_matches_pager_defaults() {
        let config = PagingConfig::default();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.prefetch_distance, 10);
        assert_eq!(config.initial_load_size, 60);
    }

    #[test]
    fn test_category_key_trims_query() {
        assert_eq!(ViewKey::category("tech", "  rust "), ViewKey::category("tech", "rust"));
    }

    #[test]
    fn test_invalidation_rules() {
        let tech = ViewKey::category("tech", "");
        let upsert_health = StoreChange::ArticlesUpserted {
            category: "health".into(),
            count: 1,
        };
        let evict_tech = StoreChange::ArticlesEvicted {
            category: "tech".into(),
            removed: 1,
        };
        let evict_health = StoreChange::ArticlesEvicted {
            category: "health".into(),
            removed: 1,
        };

        assert!(tech.is_invalidated_by(&upsert_health));
        assert!(tech.is_invalidated_by(&evict_tech));
        assert!(!tech.is_invalidated_by(&evict_health));
        assert!(!tech.is_invalidated_by(&StoreChange::BookmarksChanged));

        assert!(ViewKey::Bookmarks.is_invalidated_by(&upsert_health));
        assert!(!ViewKey::Bookmarks.is_invalidated_by(&evict_tech));
    }

    #[tokio::test]
    async fn test_initial_load_then_pages() {
        let db = seeded(23).await;
        let mut pager = Pager::new(db, ViewKey::category("tech", ""), small_pages());
        let none = HashSet::new();

        pager.load_initial(&none, 0).await.unwrap();
        assert_eq!(pager.len(), 10);
        assert_eq!(pager.items()[0].id, "id-23");
        assert!(!pager.end_reached());

        assert_eq!(pager.load_next(&none).await.unwrap(), 5);
        assert_eq!(pager.load_next(&none).await.unwrap(), 5);
        assert_eq!(pager.load_next(&none).await.unwrap(), 3);
        assert!(pager.end_reached());
        assert_eq!(pager.load_next(&none).await.unwrap(), 0);

        let ids: Vec<&str> = pager.items().iter().map(|i| i.id.as_str()).collect();
        let expected: Vec<String> = (1..=23).rev().map(|n| format!("id-{n}")).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_rebuild_keeps_window_size() {
        let db = seeded(40).await;
        let mut pager = Pager::new(db, ViewKey::category("tech", ""), small_pages());

        pager.load_initial(&HashSet::new(), 27).await.unwrap();
        assert_eq!(pager.len(), 27);
    }

    #[tokio::test]
    async fn test_large_window_is_chunked() {
        let db = seeded(600).await;
        let mut pager = Pager::new(db, ViewKey::category("tech", ""), small_pages());

        pager.load_initial(&HashSet::new(), 550).await.unwrap();
        assert_eq!(pager.len(), 550);
        assert_eq!(pager.items()[549].id, "id-51");
    }

    #[tokio::test]
    async fn test_annotation_from_bookmark_set() {
        let db = seeded(3).await;
        let mut pager = Pager::new(db, ViewKey::category("tech", ""), small_pages());
        let bookmarks = HashSet::from(["id-2".to_string()]);

        pager.load_initial(&bookmarks, 0).await.unwrap();

        let flags: Vec<bool> = pager.items().iter().map(|i| i.is_bookmarked).collect();
        assert_eq!(flags, vec![false, true, false]);
    }

    #[tokio::test]
    async fn test_bookmarks_view_is_always_bookmarked() {
        let db = seeded(3).await;
        db.add_bookmark("id-1").await.unwrap();
        let mut pager = Pager::new(db, ViewKey::Bookmarks, small_pages());

        // Even an empty id set marks rows from the bookmark join
        pager.load_initial(&HashSet::new(), 0).await.unwrap();

        assert_eq!(pager.len(), 1);
        assert!(pager.items()[0].is_bookmarked);
        assert!(pager.end_reached());
    }

    #[tokio::test]
    async fn test_prefetch_threshold() {
        let db = seeded(30).await;
        let mut pager = Pager::new(db, ViewKey::category("tech", ""), small_pages());
        pager.load_initial(&HashSet::new(), 0).await.unwrap();

        assert!(!pager.should_prefetch(5));
        assert!(pager.should_prefetch(8));
        assert!(pager.should_prefetch(9));
    }

    #[tokio::test]
    async fn test_search_query_filters() {
        let db = Database::open(":memory:").await.unwrap();
        let mut smith = test_article(1);
        smith.author = "Jane Smith".into();
        db.upsert_articles("tech", &[smith, test_article(2)])
            .await
            .unwrap();

        let mut pager = Pager::new(db, ViewKey::category("tech", "SMITH"), small_pages());
        pager.load_initial(&HashSet::new(), 0).await.unwrap();

        assert_eq!(pager.len(), 1);
        assert_eq!(pager.items()[0].id, "id-1");
    }
}
