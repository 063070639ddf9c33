//! Live, paginated views over the store.
//!
//! A view is identified by a [`ViewKey`]. Its task loads a window of rows,
//! annotates them from the bookmark id set, and rebuilds from scratch whenever
//! a committed change or a bookmark change could affect what it shows. Results
//! are published as [`ViewSnapshot`]s on a `watch` channel.

mod item;
mod live;
mod pager;

pub use item::ArticleItem;
pub use live::{BookmarkSet, ViewCommand, ViewHandle, ViewSnapshot, ViewSubscription};
pub use pager::{Pager, PagingConfig, ViewKey};
