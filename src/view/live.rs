use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::item::ArticleItem;
use super::pager::{Pager, PagingConfig, ViewKey};
use crate::storage::{Database, DatabaseError};
use crate::util::catch_task_panic;

/// Bookmarked ids a view annotates with
pub type BookmarkSet = watch::Receiver<Arc<HashSet<String>>>;

const COMMAND_BUFFER: usize = 32;

/// Latest state of a live view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub key: ViewKey,
    /// Bumped on every key switch
    pub generation: u64,
    /// Bumped on every rebuild within one generation
    pub revision: u64,
    pub items: Arc<Vec<ArticleItem>>,
    /// No rows beyond `items` exist
    pub end_reached: bool,
    pub loading: bool,
    /// Last store error; loaded items are kept
    pub error: Option<String>,
}

impl ViewSnapshot {
    fn starting(key: ViewKey, generation: u64) -> Self {
        Self {
            key,
            generation,
            revision: 0,
            items: Arc::new(Vec::new()),
            end_reached: false,
            loading: true,
            error: None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewCommand {
    LoadMore,
    /// The reader looked at this index
    Accessed(usize),
}

// ============================================================================
// View Task
// ============================================================================

/// The one running task behind a view key.
///
/// Dropping the handle aborts the task; [`ViewHandle::shutdown`] also waits
/// for it to be gone.
pub struct ViewHandle {
    key: ViewKey,
    commands: mpsc::Sender<ViewCommand>,
    task: JoinHandle<()>,
}

impl ViewHandle {
    pub fn spawn(
        db: Database,
        key: ViewKey,
        bookmarks: BookmarkSet,
        config: PagingConfig,
        output: Arc<watch::Sender<ViewSnapshot>>,
        generation: u64,
    ) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn({
            let key = key.clone();
            let output = output.clone();
            async move {
                let run = ViewTask {
                    db,
                    key: key.clone(),
                    config,
                    output: output.clone(),
                    generation,
                    revision: 0,
                };
                if let Err(panic_msg) = catch_task_panic(run.run(bookmarks, rx)).await {
                    tracing::error!(view = %key, error = %panic_msg, "View task panicked");
                    publish(&output, generation, |s| {
                        s.loading = false;
                        s.error = Some(format!("View stopped: {panic_msg}"));
                    });
                }
            }
        });

        Self {
            key,
            commands,
            task,
        }
    }

    pub fn key(&self) -> &ViewKey {
        &self.key
    }

    pub fn send(&self, command: ViewCommand) {
        if let Err(e) = self.commands.try_send(command) {
            tracing::trace!(view = %self.key, error = %e, "View command dropped");
        }
    }

    /// Abort the task and wait until it has stopped.
    pub async fn shutdown(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Overwrite the snapshot unless a newer generation already owns it.
fn publish(
    output: &watch::Sender<ViewSnapshot>,
    generation: u64,
    update: impl FnOnce(&mut ViewSnapshot),
) {
    output.send_if_modified(|snapshot| {
        if snapshot.generation != generation {
            return false;
        }
        update(snapshot);
        true
    });
}

struct ViewTask {
    db: Database,
    key: ViewKey,
    config: PagingConfig,
    output: Arc<watch::Sender<ViewSnapshot>>,
    generation: u64,
    revision: u64,
}

impl ViewTask {
    async fn run(mut self, mut bookmarks: BookmarkSet, mut commands: mpsc::Receiver<ViewCommand>) {
        // Subscribe before the first read so no commit falls in between.
        let mut changes = self.db.subscribe();
        let mut ids = bookmarks.borrow_and_update().clone();
        let mut bookmarks_live = true;

        let mut pager = self.rebuild(&ids, None).await;

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    let wanted = match command {
                        ViewCommand::LoadMore => !pager.end_reached(),
                        ViewCommand::Accessed(index) => pager.should_prefetch(index),
                    };
                    if wanted {
                        self.load_next(&mut pager, &ids).await;
                    }
                }
                change = changes.recv() => {
                    let mut dirty = match change {
                        Ok(change) => self.key.is_invalidated_by(&change),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(view = %self.key, skipped, "View lagged behind store changes");
                            true
                        }
                        Err(RecvError::Closed) => break,
                    };
                    // Fold whatever else is queued into one rebuild
                    loop {
                        match changes.try_recv() {
                            Ok(change) => dirty |= self.key.is_invalidated_by(&change),
                            Err(TryRecvError::Lagged(_)) => dirty = true,
                            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                        }
                    }
                    if dirty {
                        pager = self.rebuild(&ids, Some(pager)).await;
                    }
                }
                changed = bookmarks.changed(), if bookmarks_live => {
                    if changed.is_err() {
                        bookmarks_live = false;
                        continue;
                    }
                    ids = bookmarks.borrow_and_update().clone();
                    pager = self.rebuild(&ids, Some(pager)).await;
                }
            }
        }

        tracing::debug!(view = %self.key, generation = self.generation, "View task stopped");
    }

    /// Start a new pager generation, loading at least as many rows as
    /// `previous` held. If the load fails, `previous` stays in place.
    async fn rebuild(&mut self, ids: &HashSet<String>, previous: Option<Pager>) -> Pager {
        let min_len = previous.as_ref().map_or(0, Pager::len);
        self.revision += 1;
        let revision = self.revision;
        publish(&self.output, self.generation, |s| s.loading = true);

        let mut pager = Pager::new(self.db.clone(), self.key.clone(), self.config.clone());
        let result = pager.load_initial(ids, min_len).await;
        match result {
            Ok(()) => {
                tracing::trace!(view = %self.key, revision, rows = pager.len(), "View rebuilt");
                self.publish_pager(&pager, None);
            }
            Err(e) => {
                // Keep the previous window visible; the next change retries.
                self.publish_error(&e);
                if let Some(previous) = previous {
                    return previous;
                }
            }
        }
        pager
    }

    async fn load_next(&mut self, pager: &mut Pager, ids: &HashSet<String>) {
        publish(&self.output, self.generation, |s| s.loading = true);
        match pager.load_next(ids).await {
            Ok(added) => {
                tracing::trace!(view = %self.key, added, "Loaded next page");
                self.publish_pager(pager, None);
            }
            Err(e) => self.publish_error(&e),
        }
    }

    fn publish_pager(&self, pager: &Pager, error: Option<String>) {
        let items = Arc::new(pager.items().to_vec());
        let revision = self.revision;
        let end_reached = pager.end_reached();
        publish(&self.output, self.generation, move |s| {
            s.revision = revision;
            s.items = items;
            s.end_reached = end_reached;
            s.loading = false;
            s.error = error;
        });
    }

    fn publish_error(&self, error: &DatabaseError) {
        tracing::error!(view = %self.key, error = %error, "Failed to load view page");
        let message = error.to_string();
        publish(&self.output, self.generation, move |s| {
            s.loading = false;
            s.error = Some(message);
        });
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Owner of at most one live view at a time.
///
/// Switching keys tears the old view task down (and waits for it) before the
/// replacement starts, so nothing from a superseded key is ever published.
/// Consumers hold a `watch::Receiver<ViewSnapshot>` that stays valid across
/// switches.
pub struct ViewSubscription {
    db: Database,
    bookmarks: BookmarkSet,
    config: PagingConfig,
    output: Arc<watch::Sender<ViewSnapshot>>,
    handle: Option<ViewHandle>,
    generation: u64,
}

impl ViewSubscription {
    /// Start a view over `key`. Must be called inside a tokio runtime.
    pub fn start(db: Database, key: ViewKey, bookmarks: BookmarkSet, config: PagingConfig) -> Self {
        let (tx, _) = watch::channel(ViewSnapshot::starting(key.clone(), 1));
        let output = Arc::new(tx);
        let handle = ViewHandle::spawn(
            db.clone(),
            key,
            bookmarks.clone(),
            config.clone(),
            output.clone(),
            1,
        );

        Self {
            db,
            bookmarks,
            config,
            output,
            handle: Some(handle),
            generation: 1,
        }
    }

    /// The key currently shown, `None` after [`close`](Self::close).
    pub fn key(&self) -> Option<&ViewKey> {
        self.handle.as_ref().map(ViewHandle::key)
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.output.subscribe()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.output.borrow().clone()
    }

    /// Show `key` instead. Returns `false` when `key` is already showing.
    pub async fn switch_to(&mut self, key: ViewKey) -> bool {
        if self.key() == Some(&key) {
            return false;
        }

        if let Some(old) = self.handle.take() {
            old.shutdown().await;
        }

        self.generation += 1;
        tracing::debug!(view = %key, generation = self.generation, "Switching view");
        self.output
            .send_replace(ViewSnapshot::starting(key.clone(), self.generation));
        self.handle = Some(ViewHandle::spawn(
            self.db.clone(),
            key,
            self.bookmarks.clone(),
            self.config.clone(),
            self.output.clone(),
            self.generation,
        ));
        true
    }

    pub fn load_more(&self) {
        if let Some(handle) = &self.handle {
            handle.send(ViewCommand::LoadMore);
        }
    }

    pub fn accessed(&self, index: usize) {
        if let Some(handle) = &self.handle {
            handle.send(ViewCommand::Accessed(index));
        }
    }

    /// Stop the view task. Receivers keep the last snapshot.
    pub async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
        }
    }
}
