mod articles;
mod bookmarks;
mod eviction;
mod schema;
mod types;

pub use articles::MAX_PAGE_SIZE;
pub use bookmarks::BookmarkIds;
pub use eviction::{DEFAULT_KEEP_PER_CATEGORY, MAX_KEEP_PER_CATEGORY};
pub use schema::Database;
pub use types::{Article, DatabaseError, NewArticle, RefreshStats, StoreChange};
