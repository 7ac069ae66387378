use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

struct CacheEntry<V> {
    payload: V,
    stored_at: Instant,
}

/// Short-TTL cache absorbing bursts of identical upstream requests.
///
/// Expiry is lazy on read; [`purge_expired`](Self::purge_expired) is meant to
/// be called periodically to bound memory.
pub struct ResponseCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
}

// Manual Debug implementation for ResponseCache
impl<K, V> std::fmt::Debug for ResponseCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("entries", &"<RwLock>")
            .finish()
    }
}

impl<K, V> ResponseCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh payload for `key`, or `None` on miss or expiry.
    pub fn get(&self, key: &K) -> Option<V> {
        let expired = {
            let guard = match self.entries.read() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            match guard.get(key) {
                None => return None,
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    return Some(entry.payload.clone());
                }
                Some(_) => true,
            }
        };

        if expired {
            let mut guard = match self.entries.write() {
                Ok(g) => g,
                Err(poisoned) => {
                    tracing::error!("ResponseCache: Lock poisoned during eviction, recovering");
                    poisoned.into_inner()
                }
            };
            // Re-check: a concurrent put may have refreshed the entry
            if guard
                .get(key)
                .is_some_and(|e| e.stored_at.elapsed() >= self.ttl)
            {
                guard.remove(key);
            }
        }
        None
    }

    pub fn put(&self, key: K, payload: V) {
        let entry = CacheEntry {
            payload,
            stored_at: Instant::now(),
        };
        match self.entries.write() {
            Ok(mut guard) => {
                guard.insert(key, entry);
            }
            Err(poisoned) => {
                tracing::error!("ResponseCache: Lock poisoned during write, recovering");
                poisoned.into_inner().insert(key, entry);
            }
        }
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut guard = match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = guard.len();
        guard.retain(|_, e| e.stored_at.elapsed() < self.ttl);
        before - guard.len()
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(g) => g.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl() {
        let cache: ResponseCache<&str, u32> = ResponseCache::new(Duration::from_secs(60));
        cache.put("btc", 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&"btc"), Some(1));
        assert_eq!(cache.get(&"eth"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_expiry_on_read() {
        let cache: ResponseCache<&str, u32> = ResponseCache::new(Duration::from_secs(60));
        cache.put("btc", 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.get(&"btc"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_refreshes_timestamp() {
        let cache: ResponseCache<&str, u32> = ResponseCache::new(Duration::from_secs(60));
        cache.put("btc", 1);
        tokio::time::advance(Duration::from_secs(45)).await;
        cache.put("btc", 2);
        tokio::time::advance(Duration::from_secs(45)).await;

        assert_eq!(cache.get(&"btc"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_removes_only_stale_entries() {
        let cache: ResponseCache<String, u32> = ResponseCache::new(Duration::from_secs(60));
        cache.put("old".to_string(), 1);
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.put("new".to_string(), 2);
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"new".to_string()), Some(2));
    }
}
