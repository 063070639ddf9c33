use std::sync::Arc;

use crate::storage::Article;

/// One row as presentation code sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleItem {
    pub id: String,
    pub title: Arc<str>,
    pub author: Arc<str>,
    /// Epoch milliseconds
    pub published_date: i64,
    pub image_url: Option<Arc<str>>,
    pub article_url: Arc<str>,
    pub source_name: Option<Arc<str>>,
    pub is_bookmarked: bool,
}

impl ArticleItem {
    pub fn from_article(article: Article, is_bookmarked: bool) -> Self {
        Self {
            id: article.article_id,
            title: article.title,
            author: article.author,
            published_date: article.published_at,
            image_url: article.image_url,
            article_url: article.url,
            source_name: article.source_name,
            is_bookmarked,
        }
    }
}
