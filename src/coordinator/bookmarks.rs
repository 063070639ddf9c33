use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::storage::{BookmarkIds, Database, DatabaseError};

/// Ids whose toggle is still being written, with the state they were flipped to
type Pending = Arc<std::sync::Mutex<HashMap<String, bool>>>;

/// In-memory bookmarked-id set for immediate feedback.
///
/// Toggles flip the set first, then persist, then reconcile against the
/// store. Toggles run one at a time and the store picks the direction of
/// each write, so overlapping toggles of one id never lose an update. The
/// store stays authoritative: a background task copies every committed
/// bookmark change into the set, with in-flight flips laid over it.
pub struct BookmarkCache {
    db: Database,
    ids: Arc<watch::Sender<Arc<HashSet<String>>>>,
    committed: BookmarkIds,
    pending: Pending,
    writes: Mutex<()>,
    forwarder: JoinHandle<()>,
}

impl BookmarkCache {
    pub async fn load(db: Database) -> Result<Self, DatabaseError> {
        let committed = db.watch_bookmarked_ids().await?;
        let initial = committed.borrow().clone();
        let (tx, _) = watch::channel(initial);
        let ids = Arc::new(tx);
        let pending: Pending = Arc::default();

        let forwarder = tokio::spawn({
            let ids = ids.clone();
            let pending = pending.clone();
            let mut committed = committed.clone();
            async move {
                while committed.changed().await.is_ok() {
                    let latest = committed.borrow_and_update().clone();
                    replace_if_different(&ids, with_pending(latest, &pending));
                }
            }
        });

        Ok(Self {
            db,
            ids,
            committed,
            pending,
            writes: Mutex::new(()),
            forwarder,
        })
    }

    /// The optimistic set, as feed views should annotate with it.
    pub fn subscribe(&self) -> watch::Receiver<Arc<HashSet<String>>> {
        self.ids.subscribe()
    }

    /// The committed set, straight from the store.
    pub fn committed(&self) -> BookmarkIds {
        self.committed.clone()
    }

    pub fn contains(&self, article_id: &str) -> bool {
        self.ids.borrow().contains(article_id)
    }

    /// Flip `article_id`, returning the state the store ended up in.
    ///
    /// The cached flip is only a hint: the store decides the direction inside
    /// its own transaction, and the cache is reconciled afterwards. A failed
    /// write reverts the flip.
    pub async fn toggle(&self, article_id: &str) -> Result<bool, DatabaseError> {
        let _serialized = self.writes.lock().await;

        let hint = !self.contains(article_id);
        set_pending(&self.pending, article_id, Some(hint));
        set_membership(&self.ids, article_id, hint);

        let persisted = self.db.toggle_bookmark(article_id).await;
        set_pending(&self.pending, article_id, None);
        let reconciled = self.reconcile().await;

        if let Err(e) = &persisted {
            tracing::error!(article_id, error = %e, "Failed to persist bookmark");
            if reconciled.is_err() {
                // The store cannot be read back either; undo the flip here.
                set_membership(&self.ids, article_id, !hint);
            }
        }
        let now_bookmarked = persisted?;
        reconciled?;
        Ok(now_bookmarked)
    }

    /// Replace the cached set with the persisted one, keeping in-flight flips.
    pub async fn reconcile(&self) -> Result<(), DatabaseError> {
        let persisted = self.db.bookmarked_ids().await?;
        replace_if_different(&self.ids, with_pending(Arc::new(persisted), &self.pending));
        Ok(())
    }
}

impl Drop for BookmarkCache {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

fn set_membership(ids: &watch::Sender<Arc<HashSet<String>>>, article_id: &str, member: bool) {
    ids.send_if_modified(|ids| {
        if ids.contains(article_id) == member {
            return false;
        }
        let mut next = HashSet::clone(ids);
        if member {
            next.insert(article_id.to_string());
        } else {
            next.remove(article_id);
        }
        *ids = Arc::new(next);
        true
    });
}

fn set_pending(pending: &Pending, article_id: &str, state: Option<bool>) {
    let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
    match state {
        Some(state) => pending.insert(article_id.to_string(), state),
        None => pending.remove(article_id),
    };
}

/// `committed` with every in-flight flip applied on top.
fn with_pending(committed: Arc<HashSet<String>>, pending: &Pending) -> Arc<HashSet<String>> {
    let pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
    if pending.is_empty() {
        return committed;
    }
    let mut merged = HashSet::clone(&committed);
    for (id, &bookmarked) in pending.iter() {
        if bookmarked {
            merged.insert(id.clone());
        } else {
            merged.remove(id);
        }
    }
    Arc::new(merged)
}

fn replace_if_different(ids: &watch::Sender<Arc<HashSet<String>>>, latest: Arc<HashSet<String>>) {
    ids.send_if_modified(|current| {
        if **current == *latest {
            return false;
        }
        *current = latest;
        true
    });
}
