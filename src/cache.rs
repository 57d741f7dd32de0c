//! Quote cache keyed by directed pair (`"from/to"`)
//!
//! Values are unit prices: how much `to` one unit of `from` buys. An entry is
//! served as fresh while younger than its TTL; older entries are kept as a
//! degraded fallback for when every source fails, and only an explicit purge
//! removes them.

use crate::error::CacheError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// A cached unit price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: f64,
    pub inserted_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(value: f64, ttl: Duration) -> Self {
        Self {
            value,
            inserted_at: Utc::now(),
            ttl,
        }
    }

    /// Age of the entry
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.inserted_at
    }

    /// Checks if the entry is still within its TTL
    pub fn is_fresh(&self) -> bool {
        // an entry from the future (clock step) counts as fresh
        self.age().to_std().map_or(true, |age| age < self.ttl)
    }
}

/// Storage behind a [`QuoteCache`]
///
/// The in-process [`MemoryCache`] is always present; a shared backend
/// (e.g. one reachable by several processes) can be put in front of it.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError>;

    async fn purge(&self) -> Result<(), CacheError>;
}

/// In-process cache backend
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn purge(&self) -> Result<(), CacheError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// TTL cache of resolved pair prices
pub struct QuoteCache {
    ttl: Duration,
    shared: Option<Arc<dyn CacheBackend>>,
    memory: MemoryCache,
}

impl QuoteCache {
    /// Creates an in-process cache whose entries stay fresh for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            shared: None,
            memory: MemoryCache::new(),
        }
    }

    /// Consults `backend` before the in-process cache
    pub fn with_shared(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.shared = Some(backend);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The most recently written entry for `key` in either store
    async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let shared = match &self.shared {
            Some(shared) => match shared.get(key).await {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        backend = shared.name(),
                        error = %e,
                        "Shared cache read failed, using memory cache"
                    );
                    None
                }
            },
            None => None,
        };
        // MemoryCache never fails
        let memory = self.memory.get(key).await.ok().flatten();

        match (shared, memory) {
            (Some(shared), Some(memory)) if memory.inserted_at > shared.inserted_at => Some(memory),
            (Some(shared), _) => Some(shared),
            (None, memory) => memory,
        }
    }

    /// Returns the cached value if it is still fresh
    pub async fn get(&self, key: &str) -> Option<f64> {
        self.lookup(key)
            .await
            .filter(CacheEntry::is_fresh)
            .map(|entry| entry.value)
    }

    /// Returns the last cached value regardless of age
    pub async fn get_stale(&self, key: &str) -> Option<f64> {
        self.lookup(key).await.map(|entry| entry.value)
    }

    /// Stores a value, fresh for `ttl` or the cache default
    pub async fn set(&self, key: &str, value: f64, ttl: Option<Duration>) {
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.ttl));
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.set(key, entry.clone()).await {
                tracing::warn!(backend = shared.name(), error = %e, "Shared cache write failed");
            }
        }
        let _ = self.memory.set(key, entry).await;
    }

    /// Whether a fresh value is cached for `key`
    pub async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Drops every entry, fresh or stale
    pub async fn purge(&self) {
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.purge().await {
                tracing::warn!(backend = shared.name(), error = %e, "Shared cache purge failed");
            }
        }
        let _ = self.memory.purge().await;
    }

    /// Number of entries held in process
    pub async fn len(&self) -> usize {
        self.memory.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::constants::CACHE_PRICE_EXPIRATION_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend whose every operation fails
    #[derive(Default)]
    struct BrokenBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        fn name(&self) -> &str {
            "broken"
        }

        async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Backend {
                backend: "broken".to_string(),
                reason: "connection refused".to_string(),
            })
        }

        async fn set(&self, _key: &str, _entry: CacheEntry) -> Result<(), CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Backend {
                backend: "broken".to_string(),
                reason: "connection refused".to_string(),
            })
        }

        async fn purge(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fresh_entries_and_directed_keys() {
        let cache = QuoteCache::new(Duration::from_secs(60));
        cache.set("BTC/USD", 20000.0, None).await;

        assert_eq!(cache.get("BTC/USD").await, Some(20000.0));
        assert!(cache.has("BTC/USD").await);
        // the inverse direction is its own key
        assert_eq!(cache.get("USD/BTC").await, None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_only_served_stale() {
        let cache = QuoteCache::new(Duration::from_secs(60));
        cache.set("BTC/USD", 20000.0, Some(Duration::ZERO)).await;

        assert_eq!(cache.get("BTC/USD").await, None);
        assert!(!cache.has("BTC/USD").await);
        assert_eq!(cache.get_stale("BTC/USD").await, Some(20000.0));
    }

    #[tokio::test]
    async fn test_purge_drops_everything() {
        let cache = QuoteCache::new(Duration::from_secs(60));
        cache.set("A/B", 1.0, None).await;
        cache.set("B/A", 1.0, Some(Duration::ZERO)).await;
        assert_eq!(cache.len().await, 2);

        cache.purge().await;
        assert!(cache.is_empty().await);
        assert_eq!(cache.get_stale("B/A").await, None);
    }

    #[tokio::test]
    async fn test_failing_shared_backend_degrades_to_memory() {
        let backend = Arc::new(BrokenBackend::default());
        let cache = QuoteCache::new(Duration::from_secs(60)).with_shared(backend.clone());

        cache.set("BTC/USD", 20000.0, None).await;
        assert_eq!(cache.get("BTC/USD").await, Some(20000.0));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    /// Backend stuck on one old entry that rejects writes
    struct FrozenBackend {
        entry: CacheEntry,
    }

    #[async_trait]
    impl CacheBackend for FrozenBackend {
        fn name(&self) -> &str {
            "frozen"
        }

        async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
            Ok(Some(self.entry.clone()))
        }

        async fn set(&self, _key: &str, _entry: CacheEntry) -> Result<(), CacheError> {
            Err(CacheError::Backend {
                backend: "frozen".to_string(),
                reason: "read only".to_string(),
            })
        }

        async fn purge(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fresher_memory_entry_beats_old_shared_entry() {
        let mut old = CacheEntry::new(19000.0, Duration::from_secs(60));
        old.inserted_at = Utc::now() - chrono::Duration::minutes(5);
        let cache = QuoteCache::new(Duration::from_secs(60))
            .with_shared(Arc::new(FrozenBackend { entry: old }));

        assert_eq!(cache.get("BTC/USD").await, None);
        assert_eq!(cache.get_stale("BTC/USD").await, Some(19000.0));

        cache.set("BTC/USD", 20000.0, None).await;
        assert_eq!(cache.get("BTC/USD").await, Some(20000.0));
        assert_eq!(cache.get_stale("BTC/USD").await, Some(20000.0));
    }

    #[tokio::test]
    async fn test_shared_backend_is_consulted_first() {
        let shared = Arc::new(MemoryCache::new());
        shared
            .set("BTC/USD", CacheEntry::new(21000.0, Duration::from_secs(60)))
            .await
            .unwrap();

        let cache = QuoteCache::new(Duration::from_secs(60)).with_shared(shared);
        assert_eq!(cache.get("BTC/USD").await, Some(21000.0));
        assert_eq!(cache.len().await, 0);
    }
}
