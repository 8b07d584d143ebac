//! Service Configuration
//!
//! The structured cache policy is read from a YAML file. Every section is
//! optional; a missing file section falls back to the defaults below.

use crate::cache::compression::{CompressionAlgorithm, CompressionConfig};
use crate::cache::fast::{FastCache, MemoryFastCache, RedisFastCache, RedisSettings};
use crate::cache::invalidation::{InvalidationConfig, InvalidationManager};
use crate::cache::key::validate_namespace;
use crate::cache::metrics::DEFAULT_MAX_TRACKED_OWNERS;
use crate::cache::orchestrator::{CacheOrchestrator, OrchestratorSettings};
use crate::cache::persisted::{
    LocalPersistedCache, LocalStoreConfig, MemoryPersistedCache, PersistedCache,
};
use crate::cache::tier::TtlPolicy;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// =============================================================================
// Tier Sections
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier1Backend {
    Memory,
    #[default]
    Redis,
}

/// Tier 1 section
///
/// Redis connection settings sit at the same level as `backend`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tier1Config {
    pub backend: Tier1Backend,
    #[serde(flatten)]
    pub redis: RedisSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier2Backend {
    Memory,
    #[default]
    Local,
}

/// Tier 2 section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tier2Config {
    pub backend: Tier2Backend,
    /// Root directory of the local store
    pub path: PathBuf,
    pub compression: CompressionAlgorithm,
    /// Payloads below this size are stored uncompressed
    pub compression_min_bytes: u64,
    pub sync_writes: bool,
    /// Interval between expiry sweeps
    pub sweep_interval_secs: u64,
}

impl Default for Tier2Config {
    fn default() -> Self {
        let store = LocalStoreConfig::default();
        Self {
            backend: Tier2Backend::Local,
            path: store.root_path,
            compression: store.compression.algorithm,
            compression_min_bytes: store.compression.min_size_bytes,
            sync_writes: store.sync_writes,
            sweep_interval_secs: 600,
        }
    }
}

impl Tier2Config {
    fn store_config(&self) -> LocalStoreConfig {
        LocalStoreConfig {
            root_path: self.path.clone(),
            sync_writes: self.sync_writes,
            compression: CompressionConfig {
                algorithm: self.compression,
                min_size_bytes: self.compression_min_bytes,
                ..Default::default()
            },
        }
    }
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Complete cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default bound on one computation (0 = unbounded)
    pub compute_timeout_secs: u64,
    pub default_policy: TtlPolicy,
    /// Per-namespace overrides of `default_policy`
    pub namespaces: HashMap<String, TtlPolicy>,
    pub tier1: Tier1Config,
    pub tier2: Tier2Config,
    pub invalidation: InvalidationConfig,
    /// Capacity of the cache event channel
    pub event_channel_capacity: usize,
    /// Owners with individual statistics (others only count in aggregates)
    pub max_tracked_owners: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            compute_timeout_secs: 30,
            default_policy: TtlPolicy::default(),
            namespaces: HashMap::new(),
            tier1: Tier1Config::default(),
            tier2: Tier2Config::default(),
            invalidation: InvalidationConfig::default(),
            event_channel_capacity: 1024,
            max_tracked_owners: DEFAULT_MAX_TRACKED_OWNERS,
        }
    }
}

impl CacheConfig {
    /// Read and validate a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&contents)?;
        info!(path = %path.display(), "Loaded cache configuration");
        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.default_policy
            .validate()
            .map_err(|e| Error::Configuration(format!("default_policy: {}", e)))?;

        for (namespace, policy) in &self.namespaces {
            validate_namespace(namespace)
                .map_err(|e| Error::Configuration(format!("namespaces: {}", e)))?;
            policy
                .validate()
                .map_err(|e| Error::Configuration(format!("namespaces.{}: {}", namespace, e)))?;
        }

        if self.tier1.backend == Tier1Backend::Redis {
            self.tier1
                .redis
                .validate()
                .map_err(|e| Error::Configuration(format!("tier1: {}", e)))?;
        }

        if self.tier2.backend == Tier2Backend::Local && self.tier2.path.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "tier2.path must not be empty for the local backend".to_string(),
            ));
        }
        if self.tier2.sweep_interval_secs == 0 {
            return Err(Error::Configuration(
                "tier2.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::Configuration(
                "event_channel_capacity must be greater than zero".to_string(),
            ));
        }

        self.invalidation.validate()
    }

    /// Replace the Redis URL (e.g. from `REDIS_URL`)
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.tier1.redis.url = url.into();
        self
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            default_policy: self.default_policy,
            namespaces: self.namespaces.clone(),
            compute_timeout: match self.compute_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            sweep_interval: Duration::from_secs(self.tier2.sweep_interval_secs),
            event_channel_capacity: self.event_channel_capacity,
            max_tracked_owners: self.max_tracked_owners,
        }
    }

    pub async fn build_fast_cache(&self) -> Result<Arc<dyn FastCache>> {
        let cache: Arc<dyn FastCache> = match self.tier1.backend {
            Tier1Backend::Memory => Arc::new(MemoryFastCache::new()),
            Tier1Backend::Redis => Arc::new(RedisFastCache::connect(self.tier1.redis.clone()).await?),
        };
        Ok(cache)
    }

    pub async fn build_persisted_cache(&self) -> Result<Arc<dyn PersistedCache>> {
        let cache: Arc<dyn PersistedCache> = match self.tier2.backend {
            Tier2Backend::Memory => Arc::new(MemoryPersistedCache::new()),
            Tier2Backend::Local => {
                Arc::new(LocalPersistedCache::with_config(self.tier2.store_config()).await?)
            }
        };
        Ok(cache)
    }

    /// Open both stores and wire the orchestrator and invalidation manager
    pub async fn build(&self) -> Result<(Arc<CacheOrchestrator>, Arc<InvalidationManager>)> {
        let fast = self.build_fast_cache().await?;
        let persisted = self.build_persisted_cache().await?;
        let cache = CacheOrchestrator::new(fast, persisted, self.orchestrator_settings());
        let invalidation = Arc::new(InvalidationManager::new(
            Arc::clone(&cache),
            self.invalidation.clone(),
        ));
        Ok((cache, invalidation))
    }
}
