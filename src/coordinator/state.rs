use crate::view::ViewSnapshot;

/// Category selected when nothing else is configured
pub const DEFAULT_CATEGORY: &str = "general";

/// Categories the feed endpoint serves
pub const CATEGORIES: &[&str] = &[
    "general",
    "technology",
    "business",
    "sports",
    "health",
    "science",
    "entertainment",
];

/// Coarse state for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheState {
    pub selected_category: String,
    pub search_query: String,
    /// A refresh for `selected_category` is in flight
    pub is_refreshing: bool,
    /// Transient, dismissible note about the last refresh or bookmark action
    pub error_message: Option<String>,
}

impl CacheState {
    pub fn new(category: &str) -> Self {
        Self {
            selected_category: category.to_string(),
            search_query: String::new(),
            is_refreshing: false,
            error_message: None,
        }
    }
}

impl Default for CacheState {
    fn default() -> Self {
        Self::new(DEFAULT_CATEGORY)
    }
}

/// User intents the coordinator reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    CategorySelected(String),
    SearchQueryChanged(String),
    BookmarkToggled(String),
    RetryRequested,
    ErrorDismissed,
}

/// What the feed screen should render for a state and view snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presentation {
    /// Nothing cached yet and work is in flight
    Loading,
    /// Nothing cached, nothing in flight, no error
    Empty,
    Content,
    /// Cached rows plus a dismissible banner
    ContentWithError(String),
    /// Nothing cached and the last attempt failed; offer retry
    EmptyWithError(String),
}

impl Presentation {
    pub fn resolve(state: &CacheState, snapshot: &ViewSnapshot) -> Self {
        let error = state
            .error_message
            .clone()
            .or_else(|| snapshot.error.clone());

        match (snapshot.is_empty(), error) {
            (false, None) => Presentation::Content,
            (false, Some(message)) => Presentation::ContentWithError(message),
            (true, Some(message)) if !state.is_refreshing => Presentation::EmptyWithError(message),
            (true, _) if state.is_refreshing || snapshot.loading => Presentation::Loading,
            (true, _) => Presentation::Empty,
        }
    }

    pub fn offers_retry(&self) -> bool {
        matches!(self, Presentation::EmptyWithError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{ArticleItem, ViewKey};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn snapshot(rows: usize, loading: bool) -> ViewSnapshot {
        let items = (0..rows)
            .map(|n| ArticleItem {
                id: format!("id-{n}"),
                title: Arc::from("t"),
                author: Arc::from("a"),
                published_date: 0,
                image_url: None,
                article_url: Arc::from("u"),
                source_name: None,
                is_bookmarked: false,
            })
            .collect();
        ViewSnapshot {
            key: ViewKey::category("general", ""),
            generation: 1,
            revision: 1,
            items: Arc::new(items),
            end_reached: true,
            loading,
            error: None,
        }
    }

    fn failed(message: &str) -> CacheState {
        CacheState {
            error_message: Some(message.to_string()),
            ..CacheState::default()
        }
    }

    #[test]
    fn test_default_state() {
        let state = CacheState::default();
        assert_eq!(state.selected_category, "general");
        assert_eq!(state.search_query, "");
        assert!(!state.is_refreshing);
        assert_eq!(state.error_message, None);
    }

    #[test]
    fn test_cached_rows_with_error_show_banner() {
        assert_eq!(
            Presentation::resolve(&failed("Refresh failed"), &snapshot(30, false)),
            Presentation::ContentWithError("Refresh failed".into())
        );
    }

    #[test]
    fn test_no_rows_with_error_offers_retry() {
        let presentation = Presentation::resolve(&failed("Refresh failed"), &snapshot(0, false));
        assert_eq!(presentation, Presentation::EmptyWithError("Refresh failed".into()));
        assert!(presentation.offers_retry());
    }

    #[test]
    fn test_refreshing_with_no_rows_is_loading() {
        let state = CacheState {
            is_refreshing: true,
            ..CacheState::default()
        };
        assert_eq!(
            Presentation::resolve(&state, &snapshot(0, false)),
            Presentation::Loading
        );
    }

    #[test]
    fn test_cached_rows_shown_while_refreshing() {
        let state = CacheState {
            is_refreshing: true,
            ..CacheState::default()
        };
        assert_eq!(
            Presentation::resolve(&state, &snapshot(3, false)),
            Presentation::Content
        );
    }

    #[test]
    fn test_idle_and_empty() {
        assert_eq!(
            Presentation::resolve(&CacheState::default(), &snapshot(0, false)),
            Presentation::Empty
        );
    }

    #[test]
    fn test_view_error_surfaces_when_state_is_clean() {
        let mut snap = snapshot(2, false);
        snap.error = Some("Database error".into());
        assert_eq!(
            Presentation::resolve(&CacheState::default(), &snap),
            Presentation::ContentWithError("Database error".into())
        );
    }
}
