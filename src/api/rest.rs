//! REST API Handlers
//!
//! Admin endpoints for cache statistics, owner invalidation, and
//! domain mutation notifications from other processes.

use crate::cache::invalidation::{InvalidationManager, InvalidationReport, MutationEvent};
use crate::cache::metrics::CacheStatistics;
use crate::cache::orchestrator::{CacheHealth, CacheOrchestrator};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Aggregate statistics plus tier availability
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub statistics: CacheStatistics,
    /// Fraction of fetches served from any cache tier
    pub overall_hit_rate: f64,
    pub health: CacheHealth,
}

/// Optional namespace narrowing an owner invalidation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvalidateQuery {
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Outcome of a mutation notification
#[derive(Debug, Clone, Serialize)]
pub struct MutationResponse {
    pub owner_id: u64,
    /// True if any tier could not be cleared
    pub degraded: bool,
    pub reports: Vec<InvalidationReport>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

impl ApiErrorResponse {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
        }
    }
}

// =============================================================================
// REST Router
// =============================================================================

/// Admin router builder
pub struct AdminRouter {
    cache: Arc<CacheOrchestrator>,
    invalidation: Arc<InvalidationManager>,
}

impl AdminRouter {
    pub fn new(cache: Arc<CacheOrchestrator>, invalidation: Arc<InvalidationManager>) -> Self {
        Self {
            cache,
            invalidation,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            cache: self.cache,
            invalidation: self.invalidation,
        };

        Router::new()
            // Statistics
            .route("/v1/stats", get(get_stats))
            .route("/v1/stats/owners/:owner_id", get(get_owner_stats))
            // Invalidation
            .route("/v1/invalidate/owners/:owner_id", post(invalidate_owner))
            .route("/v1/mutations", post(handle_mutation))
            // Health
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    cache: Arc<CacheOrchestrator>,
    invalidation: Arc<InvalidationManager>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let (statistics, health) = tokio::join!(state.cache.statistics(), state.cache.health());
    let overall_hit_rate = statistics.overall_hit_rate();

    (
        StatusCode::OK,
        Json(StatsResponse {
            statistics,
            overall_hit_rate,
            health,
        }),
    )
}

async fn get_owner_stats(
    State(state): State<AppState>,
    Path(owner_id): Path<u64>,
) -> impl IntoResponse {
    match state.cache.owner_statistics(owner_id) {
        Some(stats) => (StatusCode::OK, Json(stats)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiErrorResponse::new(
                "owner_not_found",
                format!("No cache activity recorded for owner {}", owner_id),
            )),
        )
            .into_response(),
    }
}

/// Invalidate one owner, optionally narrowed to `?namespace=`
async fn invalidate_owner(
    State(state): State<AppState>,
    Path(owner_id): Path<u64>,
    Query(query): Query<InvalidateQuery>,
) -> impl IntoResponse {
    let report = match query.namespace.as_deref() {
        None => state.invalidation.invalidate_owner(owner_id).await,
        Some(namespace) => {
            match state
                .invalidation
                .invalidate_namespace_for_owner(namespace, owner_id)
                .await
            {
                Ok(report) => report,
                Err(e) => {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(ApiErrorResponse::new("invalid_namespace", e.to_string())),
                    )
                        .into_response();
                }
            }
        }
    };

    info!(
        owner_id = owner_id,
        pattern = %report.pattern,
        removed = report.removed(),
        "Admin invalidation"
    );
    (StatusCode::OK, Json(report)).into_response()
}

/// A domain write happened in another process
async fn handle_mutation(
    State(state): State<AppState>,
    Json(event): Json<MutationEvent>,
) -> impl IntoResponse {
    let reports = state.invalidation.on_mutation(&event).await;
    let degraded = reports.iter().any(InvalidationReport::is_degraded);
    if degraded {
        warn!(owner_id = event.owner_id, record = %event.record, "Mutation invalidation degraded");
    }

    (
        StatusCode::OK,
        Json(MutationResponse {
            owner_id: event.owner_id,
            degraded,
            reports,
        }),
    )
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Ready until shutdown; tier outages only slow fetches down
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.cache.is_shut_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    } else {
        (StatusCode::OK, "ready")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fast::MemoryFastCache;
    use crate::cache::invalidation::{InvalidationConfig, RecordKind};
    use crate::cache::key::Params;
    use crate::cache::orchestrator::FetchOptions;
    use crate::cache::persisted::MemoryPersistedCache;
    use crate::error::ComputeError;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use std::collections::HashMap;
    use tower::ServiceExt;

    struct Harness {
        cache: Arc<CacheOrchestrator>,
        fast: Arc<MemoryFastCache>,
        router: Router,
    }

    fn harness(config: InvalidationConfig) -> Harness {
        let fast = Arc::new(MemoryFastCache::new());
        let cache = CacheOrchestrator::new(
            fast.clone(),
            Arc::new(MemoryPersistedCache::new()),
            Default::default(),
        );
        let invalidation = Arc::new(InvalidationManager::new(cache.clone(), config));
        let router = AdminRouter::new(cache.clone(), invalidation).build();
        Harness {
            cache,
            fast,
            router,
        }
    }

    async fn warm(cache: &CacheOrchestrator, namespace: &str, owner_id: u64) {
        cache
            .fetch(
                namespace,
                owner_id,
                &Params::new().with("horizonDays", 90),
                FetchOptions::default(),
                move || async move { Ok::<_, ComputeError>(owner_id) },
            )
            .await
            .unwrap();
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let h = harness(InvalidationConfig::default());
        warm(&h.cache, "forecast", 42).await;
        warm(&h.cache, "forecast", 42).await;

        let (status, body) = send(&h.router, "GET", "/v1/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["statistics"]["tier1"]["hits"], 1);
        assert_eq!(body["statistics"]["computations"], 1);
        assert_eq!(body["statistics"]["total_keys"], 1);
        assert_eq!(body["health"]["tier1"], true);
    }

    #[tokio::test]
    async fn test_owner_stats_endpoint() {
        let h = harness(InvalidationConfig::default());
        warm(&h.cache, "forecast", 42).await;

        let (status, body) = send(&h.router, "GET", "/v1/stats/owners/42", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["owner_id"], 42);
        assert_eq!(body["computations"], 1);

        let (status, body) = send(&h.router, "GET", "/v1/stats/owners/7", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "owner_not_found");

        let (status, _) = send(&h.router, "GET", "/v1/stats/owners/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalidate_owner_endpoint() {
        let h = harness(InvalidationConfig::default());
        warm(&h.cache, "forecast", 42).await;
        warm(&h.cache, "budget", 42).await;
        warm(&h.cache, "forecast", 43).await;

        let (status, body) =
            send(&h.router, "POST", "/v1/invalidate/owners/42?namespace=budget", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pattern"]["scope"], "namespace_owner");
        assert_eq!(body["tier1"]["status"], "cleared");
        assert_eq!(body["tier1"]["removed"], 1);
        assert_eq!(h.fast.len(), 2);

        let (status, body) = send(&h.router, "POST", "/v1/invalidate/owners/42", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pattern"]["scope"], "owner");
        assert_eq!(h.fast.len(), 1);

        let (status, body) =
            send(&h.router, "POST", "/v1/invalidate/owners/42?namespace=a:b", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_namespace");
    }

    #[tokio::test]
    async fn test_mutation_endpoint() {
        let mut dependencies = HashMap::new();
        dependencies.insert(RecordKind::Transaction, vec!["forecast".to_string()]);
        let h = harness(InvalidationConfig { dependencies });
        warm(&h.cache, "forecast", 42).await;
        warm(&h.cache, "budget", 42).await;

        let event = r#"{"owner_id": 42, "record": "transaction", "action": "updated"}"#;
        let (status, body) = send(&h.router, "POST", "/v1/mutations", Some(event)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["degraded"], false);
        assert_eq!(body["reports"].as_array().unwrap().len(), 1);
        // Only the forecast entry depended on transactions
        assert_eq!(h.fast.len(), 1);

        h.fast.set_available(false);
        let (status, body) = send(&h.router, "POST", "/v1/mutations", Some(event)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["degraded"], true);
        assert_eq!(body["reports"][0]["tier1"]["status"], "failed");
    }

    #[tokio::test]
    async fn test_mutation_rejects_unknown_record() {
        let h = harness(InvalidationConfig::default());
        let event = r#"{"owner_id": 42, "record": "invoice", "action": "updated"}"#;
        let (status, _) = send(&h.router, "POST", "/v1/mutations", Some(event)).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_health_and_readiness() {
        let h = harness(InvalidationConfig::default());

        let (status, body) = send(&h.router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("ok".into()));

        let (status, _) = send(&h.router, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);

        h.cache.shutdown().await;
        let (status, _) = send(&h.router, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
