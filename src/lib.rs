//! Offline-first news cache.
//!
//! The local SQLite store is the only data the read path ever sees. A
//! [`feed::FeedSynchronizer`] pulls category pages from the remote feed into
//! the store; [`view`] turns the store into live, paginated, bookmark-aware
//! snapshots; the [`coordinator::CacheCoordinator`] ties selection, refresh
//! cancellation and bookmark toggles together.
//!
//! ```ignore
//! let db = Database::open(":memory:").await?;
//! let client = FeedClient::new("https://news.example.com", None, FetchOptions::default())?;
//! let sync = FeedSynchronizer::new(db.clone(), client, DEFAULT_KEEP_PER_CATEGORY);
//! let coordinator = CacheCoordinator::start(db, sync, PagingConfig::default(), "general").await?;
//!
//! let mut feed = coordinator.feed_view().await;
//! feed.changed().await?;
//! ```

pub mod config;
pub mod coordinator;
pub mod feed;
pub mod storage;
pub mod util;
pub mod view;
