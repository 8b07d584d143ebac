//! Multi-Tier Forecast Cache
//!
//! A two-tier cache in front of an expensive computation:
//! - **Tier 1 Fast**: shared, volatile, low-latency store (Redis or in-process)
//! - **Tier 2 Persisted**: durable store surviving Tier 1 restarts
//! - **Tier 3 Compute**: the source-of-truth computation, run once per key
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Cache Orchestrator                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────────┐  ┌────────────────────────┐     │
//! │  │ Tier 1 Fast  │  │ Tier 2 Persisted │  │  Single-Flight         │     │
//! │  │ (Redis)      │  │ (Local dir)      │  │  (per-key watch slot)  │     │
//! │  │ TTL 15m      │  │ TTL 24h / none   │  │  → ComputeEngine       │     │
//! │  └──────────────┘  └──────────────────┘  └────────────────────────┘     │
//! │         ▲                   ▲                                           │
//! │         └─────────┬─────────┘                                           │
//! │                   │  delete by pattern (namespace:owner:*)              │
//! │         ┌─────────┴──────────┐                                          │
//! │         │ Invalidation Mgr   │ ◄── domain mutations                     │
//! │         └────────────────────┘                                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  • Store failures degrade to a miss      • Failures are never cached    │
//! │  • Durable tier written first            • Cache-line aligned counters  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use forecast_cache::cache::{CacheOrchestrator, FetchOptions, MemoryFastCache};
//! use forecast_cache::cache::{InvalidationManager, LocalPersistedCache, Params};
//!
//! let fast = Arc::new(MemoryFastCache::new());
//! let persisted = Arc::new(LocalPersistedCache::with_path("/var/cache/forecast").await?);
//! let cache = CacheOrchestrator::new(fast, persisted, Default::default());
//!
//! let params = Params::new().with("horizonDays", 90);
//! let fetched = cache
//!     .fetch("forecast", 42, &params, FetchOptions::default(), || engine.run(42, 90))
//!     .await?;
//! println!("served from {}", fetched.tier);
//!
//! // After owner 42 edits a transaction
//! let invalidation = InvalidationManager::new(cache.clone(), Default::default());
//! invalidation.invalidate_owner(42).await;
//! ```

pub mod compression;
pub mod events;
pub mod fast;
pub mod invalidation;
pub mod key;
pub mod metrics;
pub mod orchestrator;
pub mod persisted;
pub mod record;
pub mod singleflight;
pub mod tier;

// Re-export main types
pub use compression::{CompressionAlgorithm, CompressionConfig, CompressionManager};
pub use events::CacheEvent;
pub use fast::{FastCache, FastCacheStats, MemoryFastCache, RedisFastCache, RedisSettings};
pub use invalidation::{
    InvalidationConfig, InvalidationManager, InvalidationReport, MutationAction, MutationEvent,
    RecordKind, TierOutcome,
};
pub use key::{CacheKey, KeyPattern, ParamValue, Params};
pub use metrics::{CacheStatistics, OwnerStatistics, StatsCollector, TierStats};
pub use orchestrator::{CacheHealth, CacheOrchestrator, FetchOptions, Fetched, OrchestratorSettings};
pub use persisted::{LocalPersistedCache, LocalStoreConfig, MemoryPersistedCache, PersistedCache};
pub use record::CacheRecord;
pub use singleflight::{FlightRole, SingleFlight};
pub use tier::{CacheTier, TierServed, TtlPolicy};
