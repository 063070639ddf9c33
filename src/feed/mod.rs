//! Remote feed access: wire format, HTTP client, normalization and the
//! synchronizer that commits a fetched page into the store.
//!
//! - [`dto`] - serde types for `GET /feed?category=<c>`
//! - [`client`] - HTTP fetching with retry, timeout and size limits
//! - [`normalize`] - article ids, placeholders and date parsing
//! - [`sync`] - fetch, normalize, upsert and evict as one refresh cycle

mod client;
mod dto;
mod normalize;
mod sync;

pub use client::{FeedClient, FetchError, FetchOptions};
pub use dto::{FeedResponse, RawArticle, SourceDto};
pub use normalize::{
    article_id_for_url, normalize_article, normalize_articles, parse_published_at,
    parse_timestamp, PLACEHOLDER_TITLE, UNKNOWN_AUTHOR,
};
pub use sync::{FeedSynchronizer, RefreshOutcome};
