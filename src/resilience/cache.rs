//! Time-bounded memoization of expensive generation results.
//!
//! Entries are keyed by a [`ContentHash`] of the request content and expire
//! after a TTL. Expired entries are dropped lazily when read and in bulk by
//! [`ResultCache::sweep`], which the daemon calls periodically. When the
//! cache is full the oldest entry is evicted to make room.
//!
//! The cache is a cost optimization only; nothing relies on a hit for
//! correctness and nothing survives a restart.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

use crate::utils::fingerprint::ContentHash;

/// Default time-to-live for cached results.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Configuration for a [`ResultCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries kept at once.
    pub max_entries: usize,
    /// Lifetime applied by [`ResultCache::set`].
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            ttl: DEFAULT_TTL,
        }
    }
}

impl CacheConfig {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    /// Entries removed because they expired or made room for new ones.
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate between 0.0 and 1.0, or 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
}

/// TTL cache for generation results.
pub struct ResultCache<V> {
    name: &'static str,
    config: CacheConfig,
    entries: RwLock<HashMap<ContentHash, CacheEntry<V>>>,
    stats: RwLock<CacheStats>,
}

impl<V: Clone> ResultCache<V> {
    /// Create a named cache; the name labels logs and metrics.
    pub fn new(name: &'static str, config: CacheConfig) -> Self {
        Self {
            name,
            config,
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up a live entry, dropping it if it has expired.
    pub fn get(&self, key: &ContentHash) -> Option<V> {
        let now = Instant::now();
        let lookup = {
            let entries = self.entries.read().expect("cache read lock poisoned");
            entries
                .get(key)
                .map(|entry| (entry.expires_at > now, entry.value.clone()))
        };

        let mut stats = self.stats.write().expect("stats write lock poisoned");
        match lookup {
            Some((true, value)) => {
                stats.hits += 1;
                crate::metrics::record_cache_lookup(self.name, true);
                Some(value)
            }
            Some((false, _)) => {
                let mut entries = self.entries.write().expect("cache write lock poisoned");
                if entries.get(key).is_some_and(|e| e.expires_at <= now) {
                    entries.remove(key);
                    stats.evictions += 1;
                }
                stats.misses += 1;
                crate::metrics::record_cache_lookup(self.name, false);
                None
            }
            None => {
                stats.misses += 1;
                crate::metrics::record_cache_lookup(self.name, false);
                None
            }
        }
    }

    /// Insert with the configured TTL.
    pub fn set(&self, key: ContentHash, value: V) {
        self.set_with_ttl(key, value, self.config.ttl);
    }

    /// Insert with an explicit TTL.
    pub fn set_with_ttl(&self, key: ContentHash, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut evicted = 0;
        {
            let mut entries = self.entries.write().expect("cache write lock poisoned");
            if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
                let before = entries.len();
                entries.retain(|_, entry| entry.expires_at > now);
                evicted += (before - entries.len()) as u64;
                while entries.len() >= self.config.max_entries.max(1) {
                    let oldest = entries
                        .iter()
                        .min_by_key(|(_, entry)| entry.inserted_at)
                        .map(|(k, _)| k.clone());
                    match oldest {
                        Some(k) => {
                            entries.remove(&k);
                            evicted += 1;
                        }
                        None => break,
                    }
                }
            }
            entries.insert(
                key,
                CacheEntry {
                    value,
                    inserted_at: now,
                    expires_at: now + ttl,
                },
            );
        }

        let mut stats = self.stats.write().expect("stats write lock poisoned");
        stats.insertions += 1;
        stats.evictions += evicted;
    }

    /// Remove every expired entry and return how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let removed = {
            let mut entries = self.entries.write().expect("cache write lock poisoned");
            let before = entries.len();
            entries.retain(|_, entry| entry.expires_at > now);
            before - entries.len()
        };
        if removed > 0 {
            self.stats
                .write()
                .expect("stats write lock poisoned")
                .evictions += removed as u64;
            tracing::debug!(cache = self.name, removed = removed, "Swept expired cache entries");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().expect("stats read lock poisoned").clone()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache read lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().expect("cache write lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ContentHash {
        ContentHash::from_content(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl() {
        let cache = ResultCache::new("test", CacheConfig::new(10));
        cache.set(key("a"), 1u32);
        tokio::time::advance(Duration::from_secs(3599)).await;
        assert_eq!(cache.get(&key("a")), Some(1));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_dropped_on_read() {
        let cache = ResultCache::new("test", CacheConfig::new(10));
        cache.set_with_ttl(key("a"), 1u32, Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.get(&key("a")), None);
        assert!(cache.is_empty());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = ResultCache::new(
            "test",
            CacheConfig::new(10).with_ttl(Duration::from_secs(10)),
        );
        cache.set(key("old"), "x".to_string());
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set(key("new"), "y".to_string());
        tokio::time::advance(Duration::from_secs(4)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("new")), Some("y".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_evicts_oldest() {
        let cache = ResultCache::new("test", CacheConfig::new(2));
        cache.set(key("a"), 1u8);
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set(key("b"), 2u8);
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set(key("c"), 3u8);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.get(&key("c")), Some(3));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
