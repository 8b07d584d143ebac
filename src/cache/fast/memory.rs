//! Process-local Tier 1 backend

use super::{check_ttl, FastCache, FastCacheStats};
use crate::cache::key::{CacheKey, KeyPattern};
use crate::cache::tier::CacheTier;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

struct FastEntry {
    value: Bytes,
    expires_at: Instant,
}

impl FastEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// DashMap-backed Tier 1 cache
///
/// Expired entries are dropped lazily on read and during pattern deletes.
/// Can be switched offline to exercise the orchestrator's degraded paths.
pub struct MemoryFastCache {
    entries: DashMap<String, FastEntry>,
    available: AtomicBool,
}

impl MemoryFastCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every operation fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored entries, including ones past expiry
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable {
                tier: CacheTier::Fast,
                reason: "memory backend offline".to_string(),
            })
        }
    }
}

impl Default for MemoryFastCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FastCache for MemoryFastCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        self.ensure_available()?;
        let storage_key = key.to_storage_key();
        let now = Instant::now();

        match self.entries.get(&storage_key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        self.entries.remove_if(&storage_key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<()> {
        self.ensure_available()?;
        check_ttl(ttl)?;
        self.entries.insert(
            key.to_storage_key(),
            FastEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.entries.remove(&key.to_storage_key()).is_some())
    }

    async fn delete_pattern(&self, pattern: &KeyPattern) -> Result<u64> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut removed = 0u64;

        self.entries.retain(|key, entry| {
            if pattern.matches_storage_key(key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });

        Ok(removed)
    }

    async fn stats(&self) -> Result<FastCacheStats> {
        self.ensure_available()?;
        let now = Instant::now();
        let total_keys = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count() as u64;
        Ok(FastCacheStats { total_keys })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::Params;

    fn key(namespace: &str, owner_id: u64, horizon: i64) -> CacheKey {
        CacheKey::build(namespace, owner_id, &Params::new().with("horizonDays", horizon)).unwrap()
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryFastCache::new();
        let k = key("forecast", 42, 90);

        assert_eq!(cache.get(&k).await.unwrap(), None);
        cache
            .set(&k, Bytes::from_static(b"payload"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get(&k).await.unwrap(), Some(Bytes::from_static(b"payload")));

        assert!(cache.delete(&k).await.unwrap());
        assert!(!cache.delete(&k).await.unwrap());
        assert_eq!(cache.get(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemoryFastCache::new();
        let k = key("forecast", 42, 90);

        cache
            .set(&k, Bytes::from_static(b"payload"), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.get(&k).await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let cache = MemoryFastCache::new();
        let result = cache
            .set(&key("forecast", 42, 90), Bytes::new(), Duration::ZERO)
            .await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_delete_pattern_scopes_by_owner_and_namespace() {
        let cache = MemoryFastCache::new();
        let ttl = Duration::from_secs(60);
        for k in [
            key("forecast", 42, 30),
            key("forecast", 42, 90),
            key("cashflow", 42, 30),
            key("forecast", 7, 30),
        ] {
            cache.set(&k, Bytes::from_static(b"v"), ttl).await.unwrap();
        }

        let pattern = KeyPattern::namespace_owner("forecast", 42).unwrap();
        assert_eq!(cache.delete_pattern(&pattern).await.unwrap(), 2);
        assert!(cache.get(&key("cashflow", 42, 30)).await.unwrap().is_some());

        assert_eq!(cache.delete_pattern(&KeyPattern::owner(42)).await.unwrap(), 1);
        assert!(cache.get(&key("forecast", 7, 30)).await.unwrap().is_some());
        assert_eq!(cache.stats().await.unwrap().total_keys, 1);
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails() {
        let cache = MemoryFastCache::new();
        cache.set_available(false);

        let err = cache.get(&key("forecast", 42, 90)).await.unwrap_err();
        assert!(err.is_transient());
        assert!(cache.delete_pattern(&KeyPattern::owner(42)).await.is_err());
        assert!(!cache.health_check().await.unwrap());

        cache.set_available(true);
        assert!(cache.health_check().await.unwrap());
    }
}
