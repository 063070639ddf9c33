use chrono::{DateTime, NaiveDateTime};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::dto::RawArticle;
use crate::storage::NewArticle;

/// Title stored when the remote article has none
pub const PLACEHOLDER_TITLE: &str = "No title available";

/// Author stored when the remote article has none
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Offset formats tried after RFC 3339, which already covers `Z`, `±hh:mm` and
/// fractional seconds.
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%.f%z"];

/// Offset-less formats, read as UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

/// Stable article identity: lowercase hex SHA-256 of the trimmed URL.
pub fn article_id_for_url(url: &str) -> String {
    let digest = Sha256::digest(url.trim().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Parse an ISO-8601 timestamp to epoch milliseconds.
///
/// Returns `None` when no known variant matches.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp_millis());
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Some(dt.timestamp_millis());
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    None
}

/// `publishedAt` to epoch milliseconds, substituting `now_ms` when it is
/// missing or unparseable.
pub fn parse_published_at(value: Option<&str>, now_ms: i64) -> i64 {
    match value.and_then(parse_timestamp) {
        Some(ms) => ms,
        None => {
            if let Some(raw) = value.filter(|v| !v.trim().is_empty()) {
                tracing::debug!(published_at = %raw, "Unparseable publish date, using fetch time");
            }
            now_ms
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Turn one wire article into a cache row.
///
/// Never fails. A blank or missing URL gets a random id, since such an
/// article cannot be deduplicated anyway.
pub fn normalize_article(raw: &RawArticle, now_ms: i64) -> NewArticle {
    let url = non_blank(raw.url.as_deref());
    let article_id = match url {
        Some(url) => article_id_for_url(url),
        None => uuid::Uuid::new_v4().to_string(),
    };

    NewArticle {
        article_id,
        title: non_blank(raw.title.as_deref())
            .unwrap_or(PLACEHOLDER_TITLE)
            .to_string(),
        author: non_blank(raw.author.as_deref())
            .unwrap_or(UNKNOWN_AUTHOR)
            .to_string(),
        published_at: parse_published_at(raw.published_at.as_deref(), now_ms),
        url: url.unwrap_or_default().to_string(),
        image_url: non_blank(raw.url_to_image.as_deref()).map(str::to_string),
        source_name: non_blank(raw.source_name()).map(str::to_string),
    }
}

/// Normalize a page, collapsing repeated URLs to their last occurrence.
pub fn normalize_articles(raw: &[RawArticle], now_ms: i64) -> Vec<NewArticle> {
    let mut articles: Vec<NewArticle> = Vec::with_capacity(raw.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(raw.len());
    for article in raw.iter().map(|r| normalize_article(r, now_ms)) {
        match positions.get(&article.article_id) {
            Some(&index) => articles[index] = article,
            None => {
                positions.insert(article.article_id.clone(), articles.len());
                articles.push(article);
            }
        }
    }
    articles
}
