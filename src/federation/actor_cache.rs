//! Remote actor caching
//!
//! Caches fetched actor documents (and so their public keys) to reduce
//! remote requests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::actor::Actor;
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

#[derive(Debug, Clone)]
struct CachedActor {
    actor: Actor,
    cached_at: Instant,
}

/// TTL cache of actor documents keyed by actor URL
pub struct ActorCache {
    entries: RwLock<HashMap<String, CachedActor>>,
    ttl: Duration,
}

impl ActorCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn is_valid(&self, entry: &CachedActor) -> bool {
        entry.cached_at.elapsed() < self.ttl
    }

    /// Get a cached actor if present and not expired
    pub async fn get(&self, url: &str) -> Option<Actor> {
        let entries = self.entries.read().await;
        match entries.get(url) {
            Some(entry) if self.is_valid(entry) => {
                CACHE_HITS_TOTAL.with_label_values(&["actor"]).inc();
                tracing::debug!("Actor cache hit for {}", url);
                Some(entry.actor.clone())
            }
            _ => {
                CACHE_MISSES_TOTAL.with_label_values(&["actor"]).inc();
                None
            }
        }
    }

    /// Whether a valid entry exists, without touching hit/miss counters
    pub async fn contains(&self, url: &str) -> bool {
        self.entries
            .read()
            .await
            .get(url)
            .is_some_and(|entry| self.is_valid(entry))
    }

    pub async fn insert(&self, url: &str, actor: Actor) {
        self.entries.write().await.insert(
            url.to_string(),
            CachedActor {
                actor,
                cached_at: Instant::now(),
            },
        );
    }

    /// Invalidate a cached actor
    ///
    /// Used when a cached key fails verification and may have rotated.
    pub async fn invalidate(&self, url: &str) {
        self.entries.write().await.remove(url);
        tracing::debug!("Invalidated actor cache for {}", url);
    }

    /// Clear all cached actors
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        tracing::debug!("Cleared all actor cache entries");
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let total = entries.len();
        let valid = entries.values().filter(|v| self.is_valid(v)).count();

        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
        }
    }

    /// Prune expired entries
    pub async fn prune_expired(&self) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, v| v.cached_at.elapsed() < ttl);
        let removed = before - entries.len();

        if removed > 0 {
            tracing::info!("Pruned {} expired actor cache entries", removed);
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Total number of entries
    pub total_entries: usize,
    /// Number of valid (non-expired) entries
    pub valid_entries: usize,
    /// Number of expired entries
    pub expired_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(id: &str) -> Actor {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "type": "Person",
            "preferredUsername": "bob",
            "inbox": format!("{}/inbox", id),
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_cache_expiry() {
        let cache = ActorCache::new(Duration::from_millis(100));
        cache
            .insert("https://remote.example/users/bob", actor("https://remote.example/users/bob"))
            .await;

        assert_eq!(cache.stats().await.valid_entries, 1);
        assert!(cache.get("https://remote.example/users/bob").await.is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.stats().await.expired_entries, 1);
        assert!(cache.get("https://remote.example/users/bob").await.is_none());

        cache.prune_expired().await;
        assert_eq!(cache.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let cache = ActorCache::new(Duration::from_secs(60));
        let url = "https://remote.example/users/bob";
        cache.insert(url, actor(url)).await;
        assert!(cache.contains(url).await);

        cache.invalidate(url).await;
        assert!(!cache.contains(url).await);
    }
}
