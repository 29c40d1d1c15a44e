//! LRU sample-data cache with TTL-based expiration.
//!
//! Sample rows are fetched per logical view for previews and are only valid
//! for the view's current column set. The scan engine drops an entry through
//! [`SampleDataInvalidator`] whenever a field is added or removed.
//!
//! # Staleness Behavior
//!
//! Cache entries are lazily evicted on access when their TTL expires.
//! Stale entries remain in the cache until accessed or evicted by LRU pressure.

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use viewsync_catalog_core::SampleDataInvalidator;

/// Sampled rows of one logical view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleData {
    /// Column names in SELECT order
    pub columns: Vec<String>,
    /// Row values aligned with `columns`
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Cached entry with timestamp for TTL-based expiration.
#[derive(Debug, Clone)]
struct CachedEntry<T> {
    value: T,
    cached_at: Instant,
}

impl<T> CachedEntry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() >= ttl
    }
}

/// Thread-safe sample-data cache keyed by form view id.
#[derive(Clone)]
pub struct SampleDataCache {
    entries: Arc<RwLock<LruCache<String, CachedEntry<SampleData>>>>,
    ttl: Duration,
}

impl SampleDataCache {
    /// Default TTL (5 minutes)
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    /// Default capacity
    pub const DEFAULT_CAPACITY: usize = 100;

    /// Create a new cache with the given capacity and TTL.
    ///
    /// Set `ttl` to `Duration::ZERO` to effectively disable caching.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(RwLock::new(LruCache::new(capacity))),
            ttl,
        }
    }

    /// Get cached sample data if present and not expired.
    pub async fn get(&self, form_view_id: &str) -> Option<SampleData> {
        if self.ttl.is_zero() {
            return None;
        }

        let cache = self.entries.read().await;
        if let Some(entry) = cache.peek(form_view_id) {
            if !entry.is_expired(self.ttl) {
                tracing::debug!(form_view_id = %form_view_id, "Sample cache hit");
                return Some(entry.value.clone());
            }
            tracing::debug!(form_view_id = %form_view_id, "Sample cache entry expired");
        }
        None
    }

    /// Store sample data for a view.
    pub async fn put(&self, form_view_id: String, data: SampleData) {
        if self.ttl.is_zero() {
            return;
        }

        let mut cache = self.entries.write().await;
        tracing::debug!(form_view_id = %form_view_id, rows = data.rows.len(), "Cached sample data");
        cache.put(form_view_id, CachedEntry::new(data));
    }

    /// Drop the entry of one view.
    pub async fn remove(&self, form_view_id: &str) -> bool {
        let mut cache = self.entries.write().await;
        let removed = cache.pop(form_view_id).is_some();
        if removed {
            tracing::debug!(form_view_id = %form_view_id, "Sample cache entry invalidated");
        }
        removed
    }

    /// Clear all cache entries.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        tracing::debug!("Sample cache cleared");
    }

    /// Returns the current number of entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let cache = self.entries.read().await;
        let expired = cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl))
            .count();

        CacheStats {
            entries: cache.len(),
            expired,
            ttl: self.ttl,
        }
    }
}

impl Default for SampleDataCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY, Self::DEFAULT_TTL)
    }
}

#[async_trait]
impl SampleDataInvalidator for SampleDataCache {
    async fn invalidate(&self, form_view_id: &str) {
        self.remove(form_view_id).await;
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Total number of entries in cache
    pub entries: usize,
    /// Number of expired entries (not yet evicted)
    pub expired: usize,
    /// Current TTL setting
    pub ttl: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(rows: usize) -> SampleData {
        SampleData {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: (0..rows).map(|i| vec![json!(i), json!("x")]).collect(),
        }
    }

    #[tokio::test]
    async fn test_cache_put_get() {
        let cache = SampleDataCache::new(10, Duration::from_secs(60));
        cache.put("v1".to_string(), sample(2)).await;

        let cached = cache.get("v1").await.unwrap();
        assert_eq!(cached.rows.len(), 2);
        assert!(cache.get("v2").await.is_none());
    }

    #[tokio::test]
    async fn test_cache_expiration() {
        let cache = SampleDataCache::new(10, Duration::from_millis(50));
        cache.put("v1".to_string(), sample(1)).await;
        assert!(cache.get("v1").await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get("v1").await.is_none());
        assert_eq!(cache.stats().await.expired, 1);
    }

    #[tokio::test]
    async fn test_cache_disabled() {
        let cache = SampleDataCache::new(10, Duration::ZERO);
        cache.put("v1".to_string(), sample(1)).await;
        assert!(cache.get("v1").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidator_drops_entry() {
        let cache = SampleDataCache::default();
        cache.put("v1".to_string(), sample(1)).await;
        cache.put("v2".to_string(), sample(1)).await;

        let invalidator: &dyn SampleDataInvalidator = &cache;
        invalidator.invalidate("v1").await;

        assert!(cache.get("v1").await.is_none());
        assert!(cache.get("v2").await.is_some());
        assert!(!cache.remove("v1").await);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = SampleDataCache::new(2, Duration::from_secs(60));
        cache.put("v1".to_string(), sample(1)).await;
        cache.put("v2".to_string(), sample(1)).await;
        cache.put("v3".to_string(), sample(1)).await;

        assert!(cache.get("v1").await.is_none());
        assert!(cache.get("v2").await.is_some());
        assert!(cache.get("v3").await.is_some());

        cache.clear().await;
        assert_eq!(cache.len().await, 0);
    }
}
