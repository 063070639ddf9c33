//! Cache coordinator: selection state, background refreshes and bookmark
//! toggles on top of the store, the synchronizer and the live views.
//!
//! Only one refresh runs at a time. Selecting a category (or retrying) aborts
//! the running refresh and waits for it before starting the next one; the
//! refresh commits inside a single transaction, so an aborted refresh leaves
//! no partial write behind. Refresh results are also generation-checked
//! before they touch [`CacheState`].

mod bookmarks;
mod state;

pub use bookmarks::BookmarkCache;
pub use state::{CacheEvent, CacheState, Presentation, CATEGORIES, DEFAULT_CATEGORY};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::feed::FeedSynchronizer;
use crate::storage::{Database, DatabaseError};
use crate::util::catch_task_panic;
use crate::view::{PagingConfig, ViewKey, ViewSnapshot, ViewSubscription};

/// Feed view plus the refresh task that feeds it. Locked together so a
/// selection change is one step.
struct Control {
    feed_view: ViewSubscription,
    refresh: Option<JoinHandle<()>>,
}

pub struct CacheCoordinator {
    sync: FeedSynchronizer,
    state: Arc<watch::Sender<CacheState>>,
    refresh_generation: Arc<AtomicU64>,
    control: Mutex<Control>,
    bookmarks_view: Mutex<ViewSubscription>,
    bookmarks: BookmarkCache,
}

impl CacheCoordinator {
    /// Build the coordinator, show `initial_category` and start its first refresh.
    pub async fn start(
        db: Database,
        sync: FeedSynchronizer,
        paging: PagingConfig,
        initial_category: &str,
    ) -> Result<Self, DatabaseError> {
        let bookmarks = BookmarkCache::load(db.clone()).await?;
        let (state, _) = watch::channel(CacheState::new(initial_category));

        // Feed rows are annotated from the optimistic set; the bookmarks view
        // lists committed rows, so it follows the store.
        let feed_view = ViewSubscription::start(
            db.clone(),
            ViewKey::category(initial_category, ""),
            bookmarks.subscribe(),
            paging.clone(),
        );
        let bookmarks_view =
            ViewSubscription::start(db, ViewKey::Bookmarks, bookmarks.committed(), paging);

        let coordinator = Self {
            sync,
            state: Arc::new(state),
            refresh_generation: Arc::new(AtomicU64::new(0)),
            control: Mutex::new(Control {
                feed_view,
                refresh: None,
            }),
            bookmarks_view: Mutex::new(bookmarks_view),
            bookmarks,
        };

        coordinator.select_category(initial_category).await;
        Ok(coordinator)
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn state(&self) -> watch::Receiver<CacheState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> CacheState {
        self.state.borrow().clone()
    }

    pub async fn feed_view(&self) -> watch::Receiver<ViewSnapshot> {
        self.control.lock().await.feed_view.subscribe()
    }

    pub async fn bookmarks_view(&self) -> watch::Receiver<ViewSnapshot> {
        self.bookmarks_view.lock().await.subscribe()
    }

    /// Current rendering decision for the feed screen.
    pub async fn presentation(&self) -> Presentation {
        let snapshot = self.control.lock().await.feed_view.snapshot();
        Presentation::resolve(&self.state.borrow(), &snapshot)
    }

    pub fn is_bookmarked(&self, article_id: &str) -> bool {
        self.bookmarks.contains(article_id)
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub async fn handle_event(&self, event: CacheEvent) {
        tracing::debug!(event = ?event, "Handling cache event");
        match event {
            CacheEvent::CategorySelected(category) => self.select_category(&category).await,
            CacheEvent::SearchQueryChanged(query) => self.set_search_query(&query).await,
            CacheEvent::BookmarkToggled(article_id) => {
                // Failure is already reported through error_message
                let _ = self.toggle_bookmark(&article_id).await;
            }
            CacheEvent::RetryRequested => self.retry().await,
            CacheEvent::ErrorDismissed => self.dismiss_error(),
        }
    }

    /// Show `category` and refresh it in the background.
    ///
    /// Cached rows for the new category appear without waiting for the
    /// network. Selecting the current category again restarts its refresh.
    pub async fn select_category(&self, category: &str) {
        let category = category.trim();
        if category.is_empty() {
            tracing::warn!("Ignoring blank category selection");
            return;
        }

        let mut control = self.control.lock().await;
        self.cancel_refresh(&mut control).await;

        let query = self.state.borrow().search_query.clone();
        self.state.send_modify(|s| {
            s.selected_category = category.to_string();
            s.error_message = None;
            s.is_refreshing = false;
        });
        control
            .feed_view
            .switch_to(ViewKey::category(category, &query))
            .await;

        self.spawn_refresh(&mut control, category);
    }

    /// Filter the current category. Does not touch the network.
    pub async fn set_search_query(&self, query: &str) {
        let mut control = self.control.lock().await;
        let category = self.state.borrow().selected_category.clone();
        self.state.send_if_modified(|s| {
            if s.search_query == query {
                return false;
            }
            s.search_query = query.to_string();
            true
        });
        control
            .feed_view
            .switch_to(ViewKey::category(&category, query))
            .await;
    }

    /// Refresh the selected category again.
    pub async fn retry(&self) {
        let category = self.state.borrow().selected_category.clone();
        self.select_category(&category).await;
    }

    pub fn dismiss_error(&self) {
        self.state.send_if_modified(|s| s.error_message.take().is_some());
    }

    /// Flip a bookmark with immediate feedback. Failures also land in
    /// `error_message`; the cached set is reconciled either way.
    pub async fn toggle_bookmark(&self, article_id: &str) -> Result<bool, DatabaseError> {
        match self.bookmarks.toggle(article_id).await {
            Ok(now_bookmarked) => Ok(now_bookmarked),
            Err(e) => {
                let message = format!("Could not update bookmark: {e}");
                self.state.send_modify(|s| s.error_message = Some(message));
                Err(e)
            }
        }
    }

    pub async fn load_more(&self) {
        self.control.lock().await.feed_view.load_more();
    }

    pub async fn accessed(&self, index: usize) {
        self.control.lock().await.feed_view.accessed(index);
    }

    pub async fn load_more_bookmarks(&self) {
        self.bookmarks_view.lock().await.load_more();
    }

    pub async fn bookmarks_accessed(&self, index: usize) {
        self.bookmarks_view.lock().await.accessed(index);
    }

    /// Wait for the in-flight refresh, if any, to finish on its own.
    pub async fn wait_for_refresh(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| !s.is_refreshing).await;
    }

    /// Abort the refresh and stop both views.
    pub async fn shutdown(&self) {
        let mut control = self.control.lock().await;
        self.cancel_refresh(&mut control).await;
        control.feed_view.close().await;
        self.bookmarks_view.lock().await.close().await;
        tracing::debug!("Cache coordinator stopped");
    }

    // ========================================================================
    // Refresh Tasks
    // ========================================================================

    async fn cancel_refresh(&self, control: &mut Control) {
        // Invalidate first so nothing the old task finishes can land.
        self.refresh_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = control.refresh.take() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Refresh task ended abnormally");
                }
            }
        }
        self.state.send_if_modified(|s| std::mem::replace(&mut s.is_refreshing, false));
    }

    fn spawn_refresh(&self, control: &mut Control, category: &str) {
        let generation = self.refresh_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|s| s.is_refreshing = true);

        let sync = self.sync.clone();
        let state = self.state.clone();
        let current = self.refresh_generation.clone();
        let category = category.to_string();

        control.refresh = Some(tokio::spawn(async move {
            let error_message = match catch_task_panic(sync.refresh(&category)).await {
                Ok(Ok(outcome)) => outcome.error_message(),
                Ok(Err(e)) => {
                    tracing::error!(category = %category, error = %e, "Cache unavailable during refresh");
                    Some(format!("Cache unavailable: {e}"))
                }
                Err(panic_msg) => {
                    tracing::error!(category = %category, error = %panic_msg, "Refresh task panicked");
                    Some(format!("Refresh crashed: {panic_msg}"))
                }
            };

            state.send_if_modified(|s| {
                if current.load(Ordering::SeqCst) != generation {
                    return false;
                }
                s.is_refreshing = false;
                s.error_message = error_message;
                true
            });
        }));
    }
}

impl Drop for CacheCoordinator {
    fn drop(&mut self) {
        if let Some(task) = self.control.get_mut().refresh.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedClient, FetchOptions};
    use crate::storage::{NewArticle, DEFAULT_KEEP_PER_CATEGORY};
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn start(server: &MockServer, db: Database) -> CacheCoordinator {
        let client = FeedClient::new(
            &server.uri(),
            None,
            FetchOptions {
                timeout: Duration::from_secs(5),
                max_retries: 0,
                retry_backoff: Duration::from_millis(1),
            },
        )
        .unwrap();
        let sync = FeedSynchronizer::new(db.clone(), client, DEFAULT_KEEP_PER_CATEGORY);
        CacheCoordinator::start(db, sync, PagingConfig::default(), "general")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_failure_reports_cache_unavailable() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "articles": [{ "title": "Fresh", "url": "https://news.example/1" }]
        });
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        sqlx::query("DROP TABLE articles")
            .execute(&db.pool)
            .await
            .unwrap();

        let coordinator = start(&server, db).await;
        tokio::time::timeout(Duration::from_secs(5), coordinator.wait_for_refresh())
            .await
            .expect("refresh did not finish");

        let state = coordinator.current_state();
        assert!(!state.is_refreshing);
        let message = state.error_message.expect("store failure should be reported");
        assert!(message.starts_with("Cache unavailable"), "got {message}");
        assert!(message.contains("no such table"), "got {message}");

        let mut feed = coordinator.feed_view().await;
        let snapshot = tokio::time::timeout(
            Duration::from_secs(5),
            feed.wait_for(|s| !s.loading && s.error.is_some()),
        )
        .await
        .expect("view did not report the store failure")
        .unwrap()
        .clone();
        assert!(snapshot.is_empty());
        assert!(coordinator.presentation().await.offers_retry());

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_bookmark_write_is_reported_and_reverted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"articles\": []}"))
            .mount(&server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let row = NewArticle {
            article_id: "a-1".to_string(),
            title: "Story".to_string(),
            author: "Desk".to_string(),
            published_at: 1,
            url: "https://news.example/a-1".to_string(),
            image_url: None,
            source_name: None,
        };
        db.upsert_articles("general", &[row]).await.unwrap();

        let coordinator = start(&server, db.clone()).await;
        coordinator.wait_for_refresh().await;

        sqlx::query("DROP TABLE bookmarks")
            .execute(&db.pool)
            .await
            .unwrap();

        assert!(coordinator.toggle_bookmark("a-1").await.is_err());
        assert!(!coordinator.is_bookmarked("a-1"));
        let message = coordinator.current_state().error_message.unwrap();
        assert!(message.starts_with("Could not update bookmark"), "got {message}");

        coordinator.shutdown().await;
    }
}
