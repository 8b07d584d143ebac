//! Prometheus Exposition
//!
//! Cache counters live in [`StatsCollector`](crate::cache::StatsCollector);
//! this module mirrors a snapshot of them into a private registry at scrape
//! time and renders the text format.

use crate::cache::metrics::CacheStatistics;
use crate::cache::orchestrator::{CacheHealth, CacheOrchestrator};
use crate::cache::tier::CacheTier;
use crate::error::{Error, Result};
use prometheus::{Encoder, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

const PREFIX: &str = "forecast_cache";

/// Gauges mirroring one [`CacheStatistics`] snapshot
pub struct CacheMetrics {
    registry: Registry,
    lookups: IntGaugeVec,
    store_errors: IntGaugeVec,
    hit_rate: GaugeVec,
    tier_up: IntGaugeVec,
    operations: IntGaugeVec,
    in_flight: IntGauge,
    tier1_keys: IntGauge,
}

impl CacheMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some(PREFIX.to_string()), None).map_err(metrics_error)?;

        let lookups = IntGaugeVec::new(
            Opts::new("lookups", "Cache lookups by tier and result"),
            &["tier", "result"],
        )
        .map_err(metrics_error)?;
        let store_errors = IntGaugeVec::new(
            Opts::new("store_errors", "Absorbed store failures by tier"),
            &["tier"],
        )
        .map_err(metrics_error)?;
        let hit_rate = GaugeVec::new(
            Opts::new("hit_rate", "Hit rate by tier (0.0 - 1.0)"),
            &["tier"],
        )
        .map_err(metrics_error)?;
        let tier_up = IntGaugeVec::new(
            Opts::new("tier_up", "Whether the tier answered its last health check"),
            &["tier"],
        )
        .map_err(metrics_error)?;
        let operations = IntGaugeVec::new(
            Opts::new("operations", "Computation and invalidation counters"),
            &["operation"],
        )
        .map_err(metrics_error)?;
        let in_flight = IntGauge::new("in_flight", "Keys currently being computed")
            .map_err(metrics_error)?;
        let tier1_keys = IntGauge::new("tier1_keys", "Estimated number of tier 1 keys")
            .map_err(metrics_error)?;

        registry.register(Box::new(lookups.clone())).map_err(metrics_error)?;
        registry.register(Box::new(store_errors.clone())).map_err(metrics_error)?;
        registry.register(Box::new(hit_rate.clone())).map_err(metrics_error)?;
        registry.register(Box::new(tier_up.clone())).map_err(metrics_error)?;
        registry.register(Box::new(operations.clone())).map_err(metrics_error)?;
        registry.register(Box::new(in_flight.clone())).map_err(metrics_error)?;
        registry.register(Box::new(tier1_keys.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            lookups,
            store_errors,
            hit_rate,
            tier_up,
            operations,
            in_flight,
            tier1_keys,
        })
    }

    /// Copy a snapshot into the gauges
    pub fn update(&self, stats: &CacheStatistics, health: &CacheHealth) {
        for tier in CacheTier::lookup_order() {
            let label = tier.as_str();
            let tier_stats = stats.tier(*tier);
            self.lookups
                .with_label_values(&[label, "hit"])
                .set(saturating(tier_stats.hits));
            self.lookups
                .with_label_values(&[label, "miss"])
                .set(saturating(tier_stats.misses));
            self.store_errors
                .with_label_values(&[label])
                .set(saturating(tier_stats.errors));
            self.hit_rate
                .with_label_values(&[label])
                .set(tier_stats.hit_rate);
        }

        self.tier_up
            .with_label_values(&[CacheTier::Fast.as_str()])
            .set(health.tier1 as i64);
        self.tier_up
            .with_label_values(&[CacheTier::Persisted.as_str()])
            .set(health.tier2 as i64);

        let operations = [
            ("computation", stats.computations),
            ("coalesced_wait", stats.coalesced_waits),
            ("compute_failure", stats.compute_failures),
            ("compute_timeout", stats.compute_timeouts),
            ("invalidation", stats.invalidations),
            ("degraded_invalidation", stats.degraded_invalidations),
        ];
        for (operation, value) in operations {
            self.operations
                .with_label_values(&[operation])
                .set(saturating(value));
        }

        self.in_flight.set(health.in_flight as i64);
        // Left at its last value when tier 1 cannot report
        if let Some(keys) = stats.total_keys {
            self.tier1_keys.set(saturating(keys));
        }
    }

    /// Text exposition of the current gauges
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Metrics encoding: {}", e)))
    }

    /// Snapshot the orchestrator and render it
    pub async fn scrape(&self, cache: &CacheOrchestrator) -> Result<String> {
        let (stats, health) = tokio::join!(cache.statistics(), cache.health());
        self.update(&stats, &health);
        self.render()
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

fn saturating(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn metrics_error(err: prometheus::Error) -> Error {
    Error::Internal(format!("Metrics error: {}", err))
}
