//! Redis Tier 1 backend
//!
//! Entries are stored as plain string keys with a millisecond TTL
//! (`PSETEX`). Every command runs under a deadline so a slow or partitioned
//! Redis degrades the cache to a miss instead of stalling callers.

use super::{check_ttl, FastCache, FastCacheStats};
use crate::cache::key::{CacheKey, KeyPattern};
use crate::cache::tier::CacheTier;
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use bytes::Bytes;
use deadpool_redis::{Config as PoolSettings, Pool, PoolConfig, Runtime, Timeouts};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection settings for the Redis backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    /// Connection URL
    pub url: String,
    /// Maximum pooled connections
    pub pool_size: usize,
    /// Deadline for single-key commands
    pub command_timeout_ms: u64,
    /// Deadline for a full pattern delete (SCAN + DEL batches)
    pub pattern_timeout_ms: u64,
    /// Prefix applied to every key this service writes
    pub key_prefix: String,
    /// SCAN batch size hint
    pub scan_count: usize,
    /// How long startup keeps retrying the first PING
    pub connect_retry_secs: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            command_timeout_ms: 250,
            pattern_timeout_ms: 5_000,
            key_prefix: "fc:".to_string(),
            scan_count: 500,
            connect_retry_secs: 10,
        }
    }
}

impl RedisSettings {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.url.is_empty() {
            return Err("redis url must not be empty".to_string());
        }
        if self.pool_size == 0 {
            return Err("redis pool_size must be at least 1".to_string());
        }
        if self.command_timeout_ms == 0 || self.pattern_timeout_ms == 0 {
            return Err("redis timeouts must be non-zero".to_string());
        }
        if self.scan_count == 0 {
            return Err("redis scan_count must be at least 1".to_string());
        }
        if self
            .key_prefix
            .chars()
            .any(|c| matches!(c, '*' | '?' | '[' | ']' | '\\'))
        {
            return Err(format!(
                "redis key_prefix '{}' must not contain glob characters",
                self.key_prefix
            ));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn pattern_timeout(&self) -> Duration {
        Duration::from_millis(self.pattern_timeout_ms)
    }
}

/// Redis-backed Tier 1 cache, shared by every service instance
pub struct RedisFastCache {
    pool: Pool,
    settings: RedisSettings,
}

impl RedisFastCache {
    /// Build the connection pool without contacting Redis
    pub fn new(settings: RedisSettings) -> Result<Self> {
        settings.validate().map_err(Error::Configuration)?;

        let deadline = settings.command_timeout();
        let mut pool_config = PoolConfig::new(settings.pool_size);
        pool_config.timeouts = Timeouts {
            wait: Some(deadline),
            create: Some(deadline),
            recycle: Some(deadline),
        };

        let mut pool_settings = PoolSettings::from_url(settings.url.clone());
        pool_settings.pool = Some(pool_config);
        let pool = pool_settings
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Configuration(format!("Failed to create Redis pool: {}", e)))?;

        Ok(Self { pool, settings })
    }

    /// Build the pool and wait for Redis to answer
    ///
    /// An unreachable Redis is not fatal: the cache starts degraded and every
    /// Tier 1 operation fails over until Redis comes back.
    pub async fn connect(settings: RedisSettings) -> Result<Self> {
        let cache = Self::new(settings)?;

        let retry = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_secs(2))
            .with_max_elapsed_time(Some(Duration::from_secs(cache.settings.connect_retry_secs)))
            .build();

        let probe = backoff::future::retry(retry, || async {
            cache.ping().await.map_err(|e| {
                debug!(error = %e, "Redis not reachable yet");
                backoff::Error::transient(e)
            })
        })
        .await;

        match probe {
            Ok(()) => info!(
                url = %cache.settings.url,
                pool_size = cache.settings.pool_size,
                "Connected to Redis"
            ),
            Err(e) => warn!(
                url = %cache.settings.url,
                error = %e,
                "Redis unreachable at startup, tier 1 starts degraded"
            ),
        }

        Ok(cache)
    }

    pub fn settings(&self) -> &RedisSettings {
        &self.settings
    }

    fn redis_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.settings.key_prefix, key.to_storage_key())
    }

    fn redis_glob(&self, pattern: &KeyPattern) -> String {
        format!("{}{}", self.settings.key_prefix, pattern.to_glob())
    }

    async fn bounded<T, Fut>(&self, after: Duration, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        tokio::time::timeout(after, fut)
            .await
            .map_err(|_| Error::StoreTimeout {
                tier: CacheTier::Fast,
                after,
            })?
    }

    async fn ping(&self) -> Result<()> {
        self.bounded(self.settings.command_timeout(), async {
            let mut conn = self.pool.get().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl FastCache for RedisFastCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let redis_key = self.redis_key(key);
        self.bounded(self.settings.command_timeout(), async {
            let mut conn = self.pool.get().await?;
            let value = conn.get::<_, Option<Vec<u8>>>(&redis_key).await?;
            Ok(value.map(Bytes::from))
        })
        .await
    }

    async fn set(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<()> {
        check_ttl(ttl)?;
        let redis_key = self.redis_key(key);
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        self.bounded(self.settings.command_timeout(), async {
            let mut conn = self.pool.get().await?;
            conn.pset_ex::<_, _, ()>(&redis_key, value.as_ref(), ttl_ms)
                .await?;
            Ok(())
        })
        .await?;

        debug!(key = %redis_key, ttl_ms = ttl_ms, "Tier 1 set");
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let redis_key = self.redis_key(key);
        self.bounded(self.settings.command_timeout(), async {
            let mut conn = self.pool.get().await?;
            let removed = conn.del::<_, u64>(&redis_key).await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn delete_pattern(&self, pattern: &KeyPattern) -> Result<u64> {
        let glob = self.redis_glob(pattern);

        let removed = self
            .bounded(self.settings.pattern_timeout(), async {
                let mut conn = self.pool.get().await?;
                let mut cursor: u64 = 0;
                let mut removed = 0u64;

                loop {
                    let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&glob)
                        .arg("COUNT")
                        .arg(self.settings.scan_count)
                        .query_async(&mut conn)
                        .await?;

                    if !keys.is_empty() {
                        removed += conn.del::<_, u64>(&keys).await?;
                    }

                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }

                Ok(removed)
            })
            .await?;

        debug!(pattern = %glob, removed = removed, "Tier 1 pattern delete");
        Ok(removed)
    }

    async fn stats(&self) -> Result<FastCacheStats> {
        self.bounded(self.settings.command_timeout(), async {
            let mut conn = self.pool.get().await?;
            let total_keys: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
            Ok(FastCacheStats { total_keys })
        })
        .await
    }

    async fn health_check(&self) -> Result<bool> {
        match self.ping().await {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!(error = %e, "Redis health check failed");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::Params;

    #[test]
    fn test_settings_validation() {
        assert!(RedisSettings::default().validate().is_ok());

        let settings = RedisSettings {
            key_prefix: "fc*".into(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = RedisSettings {
            pool_size: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[tokio::test]
    async fn test_keys_carry_prefix() {
        let cache = RedisFastCache::new(RedisSettings::default()).unwrap();
        let key = CacheKey::build("forecast", 42, &Params::new()).unwrap();

        assert_eq!(
            cache.redis_key(&key),
            format!("fc:{}", key.to_storage_key())
        );
        assert_eq!(cache.redis_glob(&KeyPattern::owner(42)), "fc:*:42:*");
    }

    #[tokio::test]
    async fn test_unreachable_redis_starts_degraded() {
        let settings = RedisSettings {
            url: "redis://127.0.0.1:1".into(),
            connect_retry_secs: 0,
            command_timeout_ms: 100,
            ..Default::default()
        };

        let cache = RedisFastCache::connect(settings).await.unwrap();
        assert!(!cache.health_check().await.unwrap());

        let key = CacheKey::build("forecast", 42, &Params::new()).unwrap();
        let err = cache.get(&key).await.unwrap_err();
        assert!(err.is_transient());
    }
}
