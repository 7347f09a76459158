//! HTTP response cache for the remote source
//!
//! In-memory cache keyed by request (method + URL), bounded by total body
//! bytes and by entry age. Entries carry the upstream `ETag` so stale
//! responses can be revalidated instead of refetched.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Response cache configuration
#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    /// Maximum total size of cached bodies in bytes. `0` disables the cache.
    pub max_bytes: usize,
    /// Maximum age of any entry. `None` never expires entries by age.
    pub max_age: Option<Duration>,
    /// How often the background task sweeps expired entries
    pub cleanup_interval: Duration,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 25_000,
            max_age: Some(Duration::from_secs(3600)),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl ResponseCacheConfig {
    /// Config from a byte bound and an age in seconds (`0` = never expire)
    pub fn new(max_bytes: usize, max_age_secs: u64) -> Self {
        Self {
            max_bytes,
            max_age: (max_age_secs > 0).then(|| Duration::from_secs(max_age_secs)),
            ..Self::default()
        }
    }
}

/// A cached upstream response
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Response body
    pub body: Bytes,
    /// Upstream ETag, used for conditional revalidation
    pub etag: Option<String>,
    /// When the response was stored or last revalidated
    pub stored_at: Instant,
    /// How long the response may be served without revalidation
    pub fresh_for: Option<Duration>,
}

impl CachedResponse {
    pub fn new(body: Bytes, etag: Option<String>, fresh_for: Option<Duration>) -> Self {
        Self {
            body,
            etag,
            stored_at: Instant::now(),
            fresh_for,
        }
    }

    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    /// True if this response may be served without asking upstream
    pub fn is_fresh(&self) -> bool {
        match self.fresh_for {
            Some(fresh_for) => self.age() < fresh_for,
            None => true,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Size- and age-bounded response cache
pub struct ResponseCache {
    entries: DashMap<String, CachedResponse>,
    config: ResponseCacheConfig,
    bytes: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: ResponseCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            bytes: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// False when configured with a zero byte bound
    pub fn is_enabled(&self) -> bool {
        self.config.max_bytes > 0
    }

    pub fn config(&self) -> &ResponseCacheConfig {
        &self.config
    }

    /// Combine the configured age bound with an upstream freshness lifetime
    pub fn freshness(&self, upstream: Option<Duration>) -> Option<Duration> {
        match (self.config.max_age, upstream) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn is_expired(&self, entry: &CachedResponse) -> bool {
        self.config
            .max_age
            .is_some_and(|max_age| entry.age() >= max_age)
    }

    /// Look up a response. Expired entries are dropped; stale-but-present
    /// entries are returned so the caller can revalidate them.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        if let Some(entry) = self.entries.get(key) {
            if !self.is_expired(&entry) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "Response cache hit");
                return Some(entry.clone());
            }
            drop(entry);
            self.remove_expired(key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = key, "Response cache miss");
        None
    }

    /// Store a response, evicting the oldest entries to stay within the byte
    /// bound. Bodies larger than the whole cache are not stored.
    pub fn insert(&self, key: &str, response: CachedResponse) {
        let size = response.body.len();
        if !self.is_enabled() || size > self.config.max_bytes {
            debug!(key = key, size = size, "Response not cacheable by size");
            return;
        }

        self.bytes.fetch_add(size, Ordering::Relaxed);
        if let Some(old) = self.entries.insert(key.to_string(), response) {
            self.bytes.fetch_sub(old.body.len(), Ordering::Relaxed);
        }
        debug!(key = key, size = size, "Response cached");

        self.maybe_evict();
    }

    /// Mark an entry as revalidated (upstream answered 304)
    pub fn refresh(&self, key: &str, fresh_for: Option<Duration>) -> Option<CachedResponse> {
        let mut entry = self.entries.get_mut(key)?;
        entry.stored_at = Instant::now();
        entry.fresh_for = fresh_for;
        Some(entry.clone())
    }

    pub fn remove(&self, key: &str) -> Option<CachedResponse> {
        let (_, entry) = self.entries.remove(key)?;
        self.bytes.fetch_sub(entry.body.len(), Ordering::Relaxed);
        Some(entry)
    }

    /// Remove `key` only if the entry stored under it is expired at the time
    /// of removal. An entry replaced since it was seen expired stays.
    fn remove_expired(&self, key: &str) -> bool {
        match self.entries.remove_if(key, |_, entry| self.is_expired(entry)) {
            Some((_, entry)) => {
                self.bytes.fetch_sub(entry.body.len(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Remove entries older than the age bound
    pub fn cleanup(&self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| self.is_expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let count = expired
            .iter()
            .filter(|key| self.remove_expired(key))
            .count();

        if count > 0 {
            debug!(count = count, "Cleaned up expired responses");
        }
        count
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            bytes: self.bytes.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Evict oldest entries until the byte bound holds
    fn maybe_evict(&self) {
        if self.bytes.load(Ordering::Relaxed) <= self.config.max_bytes {
            return;
        }

        let mut entries: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.stored_at))
            .collect();
        entries.sort_by_key(|(_, stored)| *stored);

        let mut evicted = 0;
        for (key, _) in entries {
            if self.bytes.load(Ordering::Relaxed) <= self.config.max_bytes {
                break;
            }
            if self.remove(&key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                evicted += 1;
            }
        }

        debug!(evicted = evicted, "Evicted cached responses");
    }
}

/// Spawn a background task that periodically sweeps expired entries
pub fn spawn_cleanup_task(cache: Arc<ResponseCache>) -> JoinHandle<()> {
    let interval = cache.config.cleanup_interval;

    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = cache.cleanup();
            let stats = cache.stats();
            debug!(
                removed = removed,
                entries = stats.entries,
                bytes = stats.bytes,
                "Response cache cleanup completed"
            );
        }
    });

    info!("Response cache cleanup task started");
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &'static [u8]) -> CachedResponse {
        CachedResponse::new(Bytes::from_static(body), None, None)
    }

    #[test]
    fn test_get_insert() {
        let cache = ResponseCache::new(ResponseCacheConfig::new(1000, 3600));
        assert!(cache.get("GET /users/a/keys").is_none());

        cache.insert("GET /users/a/keys", response(b"[]"));
        let hit = cache.get("GET /users/a/keys").expect("cached");
        assert_eq!(&hit.body[..], b"[]");

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.bytes, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_byte_bound_evicts_oldest() {
        let cache = ResponseCache::new(ResponseCacheConfig::new(10, 0));
        cache.insert("a", response(b"aaaa"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b", response(b"bbbb"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c", response(b"cccc"));

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().bytes, 8);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replace_keeps_byte_count() {
        let cache = ResponseCache::new(ResponseCacheConfig::new(100, 0));
        cache.insert("a", response(b"12345"));
        cache.insert("a", response(b"12"));
        assert_eq!(cache.stats().bytes, 2);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn test_oversized_and_disabled() {
        let cache = ResponseCache::new(ResponseCacheConfig::new(3, 0));
        cache.insert("big", response(b"too large"));
        assert!(cache.get("big").is_none());

        let disabled = ResponseCache::new(ResponseCacheConfig::new(0, 0));
        assert!(!disabled.is_enabled());
        disabled.insert("a", response(b"x"));
        assert_eq!(disabled.stats().entries, 0);
    }

    #[test]
    fn test_age_bound_expires() {
        let mut config = ResponseCacheConfig::new(100, 0);
        config.max_age = Some(Duration::from_millis(10));
        let cache = ResponseCache::new(config);

        cache.insert("a", response(b"x"));
        assert!(cache.get("a").is_some());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.stats().bytes, 0);
    }

    #[test]
    fn test_freshness_and_refresh() {
        let cache = ResponseCache::new(ResponseCacheConfig::new(100, 3600));
        assert_eq!(
            cache.freshness(Some(Duration::from_secs(60))),
            Some(Duration::from_secs(60))
        );
        assert_eq!(cache.freshness(None), Some(Duration::from_secs(3600)));

        cache.insert(
            "a",
            CachedResponse::new(
                Bytes::from_static(b"x"),
                Some("\"v1\"".into()),
                Some(Duration::ZERO),
            ),
        );
        let stale = cache.get("a").unwrap();
        assert!(!stale.is_fresh());

        let refreshed = cache.refresh("a", Some(Duration::from_secs(60))).unwrap();
        assert!(refreshed.is_fresh());
        assert_eq!(refreshed.etag.as_deref(), Some("\"v1\""));
    }

    #[test]
    fn test_cleanup_removes_expired() {
        let mut config = ResponseCacheConfig::new(100, 0);
        config.max_age = Some(Duration::from_millis(5));
        let cache = ResponseCache::new(config);

        cache.insert("a", response(b"x"));
        cache.insert("b", response(b"y"));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.cleanup(), 2);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_expired_removal_spares_replaced_entry() {
        let mut config = ResponseCacheConfig::new(100, 0);
        config.max_age = Some(Duration::from_millis(10));
        let cache = ResponseCache::new(config);

        cache.insert("a", response(b"old"));
        std::thread::sleep(Duration::from_millis(20));

        // a concurrent request stored a fresh body after "a" was seen expired
        cache.insert("a", response(b"new!"));
        assert!(!cache.remove_expired("a"));
        assert_eq!(&cache.get("a").unwrap().body[..], b"new!");
        assert_eq!(cache.stats().bytes, 4);

        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.remove_expired("a"));
        assert_eq!(cache.stats().bytes, 0);
        assert_eq!(cache.stats().entries, 0);
    }
}
