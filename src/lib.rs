//! Forecast Cache
//!
//! A multi-tier result cache for expensive per-owner computations such as
//! balance forecasts. Results are looked up in a fast shared store, then a
//! durable store, and only computed on a miss; concurrent misses for the same
//! key share one computation. Domain writes invalidate every cached result of
//! the affected owner.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Forecast Cache Service                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌────────────────────────┐   │
//! │  │   Admin API     │  │   Prometheus    │  │   Domain write path    │   │
//! │  │   (REST)        │  │   /metrics      │  │   (MutationEvent)      │   │
//! │  └────────┬────────┘  └────────┬────────┘  └───────────┬────────────┘   │
//! │           └────────────────────┼───────────────────────┘                │
//! │                    ┌───────────┴───────────┐                            │
//! │                    │  Cache Orchestrator   │                            │
//! │                    │  + Invalidation Mgr   │                            │
//! │                    └───────────┬───────────┘                            │
//! ├────────────────────────────────┼────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌────────┴────────┐  ┌────────────────────────┐   │
//! │  │  Tier 1 Fast    │  │ Tier 2 Persisted│  │  Tier 3 ComputeEngine  │   │
//! │  │  (Redis)        │  │ (Local dir)     │  │  (single-flight)       │   │
//! │  └─────────────────┘  └─────────────────┘  └────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: Tiers, orchestrator, single-flight and invalidation
//! - [`compute`]: The compute boundary and the forecast request
//! - [`config`]: YAML configuration and store wiring
//! - [`api`]: Admin REST API
//! - [`telemetry`]: Prometheus exposition
//! - [`error`]: Error types and handling

pub mod api;
pub mod cache;
pub mod compute;
pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types
pub use api::{AdminRouter, ApiServer, ApiServerConfig};

pub use cache::{
    CacheEvent, CacheHealth, CacheKey, CacheOrchestrator, CacheStatistics, CacheTier,
    FastCache, FetchOptions, Fetched, InvalidationConfig, InvalidationManager,
    InvalidationReport, KeyPattern, LocalPersistedCache, MemoryFastCache, MemoryPersistedCache,
    MutationAction, MutationEvent, OrchestratorSettings, Params, PersistedCache, RecordKind,
    RedisFastCache, RedisSettings, TierServed, TtlPolicy,
};

pub use compute::{CacheableRequest, ComputeEngine, ForecastRequest, FORECAST_NAMESPACE};

pub use config::CacheConfig;

pub use error::{ComputeError, Error, Result};

pub use telemetry::CacheMetrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
