use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde_json::Value;

use crate::infrastructure::config::CacheSettings;
use crate::infrastructure::error::{EngineError, Result};

/// Contract of the key/value store behind the memoizer.
///
/// Any `Err` is read as "store unavailable"; the memoizer recovers from it.
#[async_trait]
pub trait CacheGateway: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    async fn clear(&self) -> Result<bool>;

    fn get_sync(&self, key: &str) -> Result<Option<Value>>;

    fn set_sync(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<bool>;
}

/// Cache entry with expiry metadata
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        let expires_at = ttl
            .and_then(|duration| chrono::Duration::from_std(duration).ok())
            .and_then(|duration| now.checked_add_signed(duration));

        Self { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }
}

/// In-process gateway: LRU-bounded, entries expire lazily on access
#[derive(Debug)]
pub struct MemoryGateway {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryGateway {
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| EngineError::config("memory gateway capacity must be positive"))?;

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn from_settings(settings: &CacheSettings) -> Result<Self> {
        Self::new(settings.memory_capacity)
    }

    fn lock(&self, operation: &str) -> Result<MutexGuard<'_, LruCache<String, CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|_| EngineError::cache_unavailable(operation, "memory gateway lock poisoned"))
    }

    /// Live (unexpired) keys, most recently used first
    pub fn keys(&self) -> Result<Vec<String>> {
        let entries = self.lock("keys")?;
        Ok(entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        let entries = self.lock("contains_key")?;
        Ok(entries.peek(key).map_or(false, |entry| !entry.is_expired()))
    }

    pub fn delete_sync(&self, key: &str) -> Result<bool> {
        let mut entries = self.lock("delete")?;
        Ok(entries.pop(key).is_some())
    }
}

#[async_trait]
impl CacheGateway for MemoryGateway {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.get_sync(key)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<bool> {
        self.set_sync(key, value, ttl)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.delete_sync(key)
    }

    async fn clear(&self) -> Result<bool> {
        self.lock("clear")?.clear();
        Ok(true)
    }

    fn get_sync(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.lock("get")?;
        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    fn set_sync(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<bool> {
        let mut entries = self.lock("set")?;
        entries.put(key.to_string(), CacheEntry::new(value, ttl));
        Ok(true)
    }
}

/// Which cache tiers a memoized function reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheLevel {
    /// In-process tier only
    Local,
    /// External store only
    Shared,
    /// Local first, then the external store
    #[default]
    All,
}

/// The gateways available to the memoizer
#[derive(Clone, Default)]
pub struct CacheTiers {
    local: Option<Arc<dyn CacheGateway>>,
    shared: Option<Arc<dyn CacheGateway>>,
}

impl CacheTiers {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single external store
    pub fn shared(gateway: Arc<dyn CacheGateway>) -> Self {
        Self::new().with_shared(gateway)
    }

    pub fn with_local(mut self, gateway: Arc<dyn CacheGateway>) -> Self {
        self.local = Some(gateway);
        self
    }

    pub fn with_shared(mut self, gateway: Arc<dyn CacheGateway>) -> Self {
        self.shared = Some(gateway);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.shared.is_none()
    }

    /// Gateways for `level`, local first. A level whose tiers are not configured
    /// falls back to whatever is configured.
    pub fn select(&self, level: CacheLevel) -> Vec<Arc<dyn CacheGateway>> {
        let wanted: Vec<Arc<dyn CacheGateway>> = match level {
            CacheLevel::Local => self.local.iter().cloned().collect(),
            CacheLevel::Shared => self.shared.iter().cloned().collect(),
            CacheLevel::All => self.local.iter().chain(self.shared.iter()).cloned().collect(),
        };

        if wanted.is_empty() {
            self.local.iter().chain(self.shared.iter()).cloned().collect()
        } else {
            wanted
        }
    }
}

impl std::fmt::Debug for CacheTiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheTiers")
            .field("local", &self.local.is_some())
            .field("shared", &self.shared.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_gateway_basic_operations() {
        let gateway = MemoryGateway::new(10).unwrap();

        assert!(gateway.set("key1", json!({"a": 1}), None).await.unwrap());
        assert_eq!(gateway.get("key1").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(gateway.get("missing").await.unwrap(), None);
        assert!(gateway.contains_key("key1").unwrap());

        assert!(gateway.delete("key1").await.unwrap());
        assert!(!gateway.delete("key1").await.unwrap());
        assert_eq!(gateway.get("key1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_gateway_ttl_expiry() {
        let gateway = MemoryGateway::new(10).unwrap();
        gateway
            .set("short", json!(1), Some(Duration::from_millis(30)))
            .await
            .unwrap();
        gateway.set("long", json!(2), Some(Duration::from_secs(60))).await.unwrap();

        assert_eq!(gateway.get("short").await.unwrap(), Some(json!(1)));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(gateway.get("short").await.unwrap(), None);
        assert_eq!(gateway.get("long").await.unwrap(), Some(json!(2)));
        assert_eq!(gateway.keys().unwrap(), vec!["long".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_gateway_lru_eviction_and_clear() {
        let gateway = MemoryGateway::new(2).unwrap();
        gateway.set_sync("a", json!(1), None).unwrap();
        gateway.set_sync("b", json!(2), None).unwrap();
        gateway.get_sync("a").unwrap();
        gateway.set_sync("c", json!(3), None).unwrap();

        assert!(gateway.contains_key("a").unwrap());
        assert!(!gateway.contains_key("b").unwrap());
        assert_eq!(gateway.len().unwrap(), 2);

        assert!(gateway.clear().await.unwrap());
        assert!(gateway.is_empty().unwrap());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            MemoryGateway::new(0),
            Err(EngineError::Configuration { .. })
        ));
    }

    #[test]
    fn test_tier_selection() {
        let local: Arc<dyn CacheGateway> = Arc::new(MemoryGateway::new(4).unwrap());
        let shared: Arc<dyn CacheGateway> = Arc::new(MemoryGateway::new(4).unwrap());

        let both = CacheTiers::new()
            .with_local(Arc::clone(&local))
            .with_shared(Arc::clone(&shared));
        assert_eq!(both.select(CacheLevel::All).len(), 2);
        assert!(Arc::ptr_eq(&both.select(CacheLevel::Local)[0], &local));
        assert!(Arc::ptr_eq(&both.select(CacheLevel::Shared)[0], &shared));

        let shared_only = CacheTiers::shared(Arc::clone(&shared));
        let fallback = shared_only.select(CacheLevel::Local);
        assert_eq!(fallback.len(), 1);
        assert!(Arc::ptr_eq(&fallback[0], &shared));

        assert!(CacheTiers::new().select(CacheLevel::All).is_empty());
    }
}
