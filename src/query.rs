//! Cache-checked query path.
//!
//! The external embedding collaborator computes the query vector (its
//! cache lives in [`CacheLayer`] under the normalized query text); this
//! module covers the step after that: ranked retrieval with the match
//! cache in front of the store.

use tracing::debug;

use crate::cache::CacheLayer;
use crate::models::SearchMatch;
use crate::store::VectorStore;

/// Canonical form of a query text, used as the embedding-cache key.
///
/// Lowercases and collapses all whitespace runs to single spaces, so
/// trivially different phrasings of the same query share a cache entry.
pub fn normalize_query(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Search with the match cache in front of the store.
///
/// A cache hit skips the store entirely; a miss runs the backend search
/// and populates the cache (including empty results, which are valid
/// answers worth caching).
pub async fn cached_search(
    store: &dyn VectorStore,
    cache: &CacheLayer,
    query: &[f32],
    top_k: usize,
    threshold: f32,
) -> Vec<SearchMatch> {
    if let Some(matches) = cache.get_matches(query).await {
        debug!(matches = matches.len(), "match cache hit");
        return matches;
    }

    let matches = store.search(query, top_k, threshold).await;
    cache.set_matches(query, &matches).await;
    matches
}
