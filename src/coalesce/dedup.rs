//! Short-lived "recently checked" cache.
//!
//! Records when a check was last admitted for a key. A second check for the
//! same key inside the window is dropped outright, which protects the
//! evaluator from trigger storms at the cost of possibly delaying an unlock
//! by up to one window.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the dedup cache.
#[derive(Debug, Clone)]
pub struct DedupCacheConfig {
    /// How long an admitted check suppresses repeats
    pub window: Duration,

    /// How often to sweep expired entries
    pub cleanup_interval: Duration,
}

impl Default for DedupCacheConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct DedupStats {
    admitted: AtomicU64,
    dropped: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of dedup cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStatsSnapshot {
    pub admitted: u64,
    pub dropped: u64,
    pub evictions: u64,
}

// =============================================================================
// Dedup Cache
// =============================================================================

/// Per-key admission gate with a fixed window.
pub struct DedupCache<K> {
    entries: DashMap<K, Instant>,
    config: DedupCacheConfig,
    stats: DedupStats,
}

impl<K> DedupCache<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new(config: DedupCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            stats: DedupStats::default(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DedupCacheConfig::default())
    }

    pub fn config(&self) -> &DedupCacheConfig {
        &self.config
    }

    /// Admit a check for `key` unless one was admitted within the window.
    ///
    /// Returns false when the check should be dropped.
    pub fn try_admit(&self, key: K) -> bool {
        let now = Instant::now();
        match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) < self.config.window {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(key = ?entry.key(), "Check dropped by dedup cache");
                    false
                } else {
                    entry.insert(now);
                    self.stats.admitted.fetch_add(1, Ordering::Relaxed);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                self.stats.admitted.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    /// True if a check for `key` is still inside its window.
    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .map(|at| at.elapsed() < self.config.window)
            .unwrap_or(false)
    }

    /// Forget `key` so the next check is admitted (e.g. after a failure).
    ///
    /// Returns true if an entry was removed.
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove all expired entries.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup(&self) -> usize {
        let window = self.config.window;
        let mut removed = 0;
        self.entries.retain(|_, at| {
            if at.elapsed() >= window {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            self.stats.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> DedupStatsSnapshot {
        DedupStatsSnapshot {
            admitted: self.stats.admitted.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Periodically sweep expired entries
pub fn spawn_cleanup_task<K>(cache: Arc<DedupCache<K>>) -> tokio::task::JoinHandle<()>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cache.config.cleanup_interval);
        loop {
            ticker.tick().await;
            let removed = cache.cleanup();
            if removed > 0 {
                debug!(removed, remaining = cache.len(), "Dedup cache swept");
            }
        }
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(window_secs: u64) -> DedupCache<(String, u8)> {
        DedupCache::new(DedupCacheConfig {
            window: Duration::from_secs(window_secs),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_admit_within_window_dropped() {
        let cache = cache(60);
        assert!(cache.try_admit(("w1".into(), 1)));
        assert!(!cache.try_admit(("w1".into(), 1)));

        let stats = cache.stats();
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let cache = cache(60);
        assert!(cache.try_admit(("w1".into(), 1)));
        assert!(cache.try_admit(("w1".into(), 2)));
        assert!(cache.try_admit(("w2".into(), 1)));
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admitted_again_after_window() {
        let cache = cache(60);
        assert!(cache.try_admit(("w1".into(), 1)));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!cache.try_admit(("w1".into(), 1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.try_admit(("w1".into(), 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_readmits() {
        let cache = cache(60);
        assert!(cache.try_admit(("w1".into(), 1)));
        assert!(cache.invalidate(&("w1".into(), 1)));
        assert!(cache.try_admit(("w1".into(), 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_expired() {
        let cache = cache(10);
        cache.try_admit(("old".into(), 1));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.try_admit(("new".into(), 1));
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(cache.cleanup(), 1);
        assert!(!cache.contains(&("old".into(), 1)));
        assert!(cache.contains(&("new".into(), 1)));
        assert_eq!(cache.stats().evictions, 1);
    }
}
