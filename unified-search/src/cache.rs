//! Time-bounded cache of full result sets.
//!
//! Keyed by the **raw** query string: no trimming or case folding is applied,
//! so `"foo"` and `"Foo "` are distinct entries. Uses [`moka`] for
//! async-friendly caching with a TTL and a capacity bound; expired entries
//! are reported as absent and evicted lazily.

use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;

use crate::types::SearchResults;

/// Snapshot reported by the cache status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub entries: u64,
    pub ttl_seconds: u64,
    pub max_entries: u64,
    pub enabled: bool,
}

/// Process-wide query cache shared by concurrent searches.
///
/// A TTL of zero disables caching: `get` always misses and `set` is a no-op.
#[derive(Clone)]
pub struct QueryCache {
    inner: Cache<String, SearchResults>,
    ttl: Duration,
    max_entries: u64,
}

impl QueryCache {
    /// Create a cache whose entries expire `ttl` after insertion.
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl.max(Duration::from_millis(1)))
            .build();
        Self {
            inner,
            ttl,
            max_entries,
        }
    }

    fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Look up a previous result set for exactly this query string.
    pub async fn get(&self, query: &str) -> Option<SearchResults> {
        if !self.enabled() {
            return None;
        }
        self.inner.get(query).await
    }

    /// Store a result set for `query`, replacing any previous entry.
    pub async fn set(&self, query: &str, results: SearchResults) {
        if !self.enabled() {
            return;
        }
        self.inner.insert(query.to_owned(), results).await;
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }

    /// Current entry count and limits.
    pub async fn status(&self) -> CacheStatus {
        self.inner.run_pending_tasks().await;
        CacheStatus {
            entries: self.inner.entry_count(),
            ttl_seconds: self.ttl.as_secs(),
            max_entries: self.max_entries,
            enabled: self.enabled(),
        }
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results_for(query: &str) -> SearchResults {
        SearchResults::empty(query)
    }

    #[tokio::test]
    async fn cache_miss_returns_none() {
        let cache = QueryCache::new(Duration::from_secs(60), 10);
        assert!(cache.get("nonexistent_query_xyz123").await.is_none());
    }

    #[tokio::test]
    async fn cache_insert_and_retrieve() {
        let cache = QueryCache::new(Duration::from_secs(60), 10);
        cache.set("rust", results_for("rust")).await;
        let cached = cache.get("rust").await.expect("should be cached");
        assert_eq!(cached.query, "rust");
    }

    #[tokio::test]
    async fn raw_query_is_the_key() {
        let cache = QueryCache::new(Duration::from_secs(60), 10);
        cache.set("foo", results_for("foo")).await;
        assert!(cache.get("foo").await.is_some());
        assert!(cache.get("Foo ").await.is_none());
        assert!(cache.get("FOO").await.is_none());
    }

    #[tokio::test]
    async fn overwrite_same_key_updates_value() {
        let cache = QueryCache::new(Duration::from_secs(60), 10);
        let mut old = results_for("q");
        old.cache_hit = false;
        let mut new = results_for("q");
        new.error = Some("marker".into());
        cache.set("q", old).await;
        cache.set("q", new).await;
        let cached = cache.get("q").await.expect("cached");
        assert_eq!(cached.error.as_deref(), Some("marker"));
    }

    #[tokio::test]
    async fn entry_present_before_ttl_and_absent_after() {
        let cache = QueryCache::new(Duration::from_millis(400), 10);
        cache.set("ttl", results_for("ttl")).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get("ttl").await.is_some(), "expired too early");

        tokio::time::sleep(Duration::from_millis(550)).await;
        assert!(cache.get("ttl").await.is_none(), "still present after TTL");
    }

    #[tokio::test]
    async fn zero_ttl_disables_caching() {
        let cache = QueryCache::new(Duration::ZERO, 10);
        cache.set("q", results_for("q")).await;
        assert!(cache.get("q").await.is_none());
        assert!(!cache.status().await.enabled);
    }

    #[tokio::test]
    async fn clear_and_status() {
        let cache = QueryCache::new(Duration::from_secs(60), 25);
        cache.set("a", results_for("a")).await;
        cache.set("b", results_for("b")).await;

        let status = cache.status().await;
        assert_eq!(status.entries, 2);
        assert_eq!(status.ttl_seconds, 60);
        assert_eq!(status.max_entries, 25);

        cache.clear().await;
        assert_eq!(cache.status().await.entries, 0);
        assert!(cache.get("a").await.is_none());
    }
}
