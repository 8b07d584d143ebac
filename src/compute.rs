//! Compute Boundary (Tier 3)
//!
//! The expensive source-of-truth computation sits behind [`ComputeEngine`].
//! Engines hold no cache state of their own and must be callable from many
//! tasks at once; the orchestrator decides when they run.

use crate::cache::key::Params;
use crate::error::ComputeError;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Namespace under which forecasts are cached
pub const FORECAST_NAMESPACE: &str = "forecast";

// =============================================================================
// Traits
// =============================================================================

/// A request whose result can be cached
///
/// Two requests that should share a cached result must yield the same
/// namespace, owner and parameters.
pub trait CacheableRequest: Send + Sync {
    /// Namespace the result is cached under
    fn namespace(&self) -> &str;

    /// Owner the result belongs to
    fn owner_id(&self) -> u64;

    /// Every input that changes the result
    fn params(&self) -> Params;
}

/// Trait for Tier 3 engines
#[async_trait]
pub trait ComputeEngine: Send + Sync {
    type Request: CacheableRequest;
    type Output: Serialize + DeserializeOwned + Send + Sync;

    /// Compute a fresh result
    async fn compute(&self, request: &Self::Request) -> Result<Self::Output, ComputeError>;
}

// =============================================================================
// Forecast Request
// =============================================================================

/// Balance forecast for one owner
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastRequest {
    pub owner_id: u64,
    /// Days projected forward from `start_date`
    pub horizon_days: u32,
    /// First projected day (None = today, resolved by the engine)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    /// Include bills and transactions not yet posted
    #[serde(default)]
    pub include_pending: bool,
    /// Named what-if scenario
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
}

impl ForecastRequest {
    pub fn new(owner_id: u64, horizon_days: u32) -> Self {
        Self {
            owner_id,
            horizon_days,
            start_date: None,
            include_pending: false,
            scenario: None,
        }
    }

    pub fn starting(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn with_pending(mut self) -> Self {
        self.include_pending = true;
        self
    }

    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }
}

impl CacheableRequest for ForecastRequest {
    fn namespace(&self) -> &str {
        FORECAST_NAMESPACE
    }

    fn owner_id(&self) -> u64 {
        self.owner_id
    }

    fn params(&self) -> Params {
        let mut params = Params::new()
            .with("horizonDays", self.horizon_days)
            .with("includePending", self.include_pending);
        if let Some(date) = self.start_date {
            params.insert("startDate", date);
        }
        if let Some(scenario) = &self.scenario {
            params.insert("scenario", scenario.as_str());
        }
        params
    }
}
