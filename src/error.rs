//! Error types for the forecast cache
//!
//! Provides structured error types for the cache tiers, the compute boundary,
//! key construction, and service configuration.

use std::time::Duration;
use thiserror::Error;

use crate::cache::tier::CacheTier;

/// Unified error type for the cache
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Key Errors
    // =========================================================================
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    // =========================================================================
    // Store Errors (absorbed by the orchestrator, never surfaced to callers)
    // =========================================================================
    #[error("Cache store unavailable: {tier} - {reason}")]
    StoreUnavailable { tier: CacheTier, reason: String },

    #[error("Cache store timed out: {tier} after {after:?}")]
    StoreTimeout { tier: CacheTier, after: Duration },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    RedisPool(String),

    // =========================================================================
    // Compute Errors
    // =========================================================================
    #[error(transparent)]
    Compute(#[from] ComputeError),

    // =========================================================================
    // Encoding Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Compression error: {0}")]
    Compression(String),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Error::RedisPool(err.to_string())
    }
}

impl Error {
    /// Check if this error is a transient store failure
    ///
    /// Transient errors degrade performance only: the orchestrator treats them
    /// as a miss (reads) or a no-op (writes).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable { .. }
                | Error::StoreTimeout { .. }
                | Error::Redis(_)
                | Error::RedisPool(_)
                | Error::Io(_)
        )
    }

    /// Check if this error came out of the compute boundary
    pub fn is_compute(&self) -> bool {
        matches!(self, Error::Compute(_))
    }

    /// Get the compute error, if this is one
    pub fn as_compute(&self) -> Option<&ComputeError> {
        match self {
            Error::Compute(e) => Some(e),
            _ => None,
        }
    }
}

/// Failure of a computation
///
/// Cloneable so a single outcome can be delivered to every waiter of a
/// single-flight slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    #[error("Computation failed: {0}")]
    Failed(String),

    #[error("Computation timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("Computation abandoned before completion")]
    Abandoned,

    #[error("Computation produced an unserializable result: {0}")]
    InvalidOutput(String),
}

impl ComputeError {
    /// Convenience constructor for engine failures
    pub fn failed(reason: impl Into<String>) -> Self {
        ComputeError::Failed(reason.into())
    }

    /// Check if this is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, ComputeError::TimedOut { .. })
    }
}

/// Result type alias for the cache
pub type Result<T> = std::result::Result<T, Error>;
