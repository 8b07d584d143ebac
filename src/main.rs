//! Forecast Cache Service
//!
//! Runs the multi-tier cache with its admin API, health probes, and
//! Prometheus metrics.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                      forecast-cache process                       │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  :8090 Admin API    :8081 /healthz /readyz    :8080 /metrics      │
//! │         │                    │                      │             │
//! │         └────────────────────┼──────────────────────┘             │
//! │                   ┌──────────┴───────────┐                        │
//! │                   │  Cache Orchestrator  │── Tier 2 sweeper       │
//! │                   └──────────┬───────────┘                        │
//! │                 ┌────────────┴────────────┐                       │
//! │          Tier 1 (Redis)           Tier 2 (local dir)              │
//! └───────────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use forecast_cache::{
    ApiServer, ApiServerConfig, CacheConfig, CacheMetrics, CacheOrchestrator, Error, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Forecast Cache - multi-tier result cache with owner-scoped invalidation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML cache configuration (defaults apply when omitted)
    #[arg(long, env = "FORECAST_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Tier 1 Redis URL, overriding the configuration file
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Admin API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Forecast Cache");
    info!("  Version: {}", forecast_cache::VERSION);
    info!("  Admin API: {}", args.api_addr);

    let mut config = match &args.config {
        Some(path) => CacheConfig::load(path)?,
        None => {
            info!("No configuration file given, using defaults");
            CacheConfig::default()
        }
    };
    if let Some(url) = &args.redis_url {
        config = config.with_redis_url(url.clone());
        config.validate()?;
    }

    let (cache, invalidation) = config.build().await?;
    cache.spawn_maintenance();

    let metrics = Arc::new(CacheMetrics::new()?);
    let probes = CancellationToken::new();

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_cache = cache.clone();
    let health_stop = probes.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_cache, health_stop).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_cache = cache.clone();
    let metrics_stop = probes.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_cache, metrics, metrics_stop).await
        {
            error!("Metrics server error: {}", e);
        }
    });

    let api_config = ApiServerConfig {
        rest_addr: args.api_addr.parse().map_err(|e| {
            Error::Configuration(format!("Invalid admin API address: {}", e))
        })?,
    };
    let api_server = Arc::new(ApiServer::new(api_config, cache.clone(), invalidation));

    let signal_server = api_server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_server.shutdown();
    });

    let served = api_server.run().await;

    probes.cancel();
    cache.shutdown().await;

    info!("Forecast cache shutdown complete");
    served
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn", "axum=info", "redis=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Probe Servers
// =============================================================================

fn text_response(
    status: hyper::StatusCode,
    body: impl Into<hyper::Body>,
) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(
    addr: &str,
    cache: Arc<CacheOrchestrator>,
    stop: CancellationToken,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let cache = cache.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let cache = cache.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        // Tier outages degrade latency only, so readiness
                        // tracks the process lifecycle
                        "/readyz" if cache.is_shut_down() => {
                            text_response(StatusCode::SERVICE_UNAVAILABLE, "shutting down")
                        }
                        "/readyz" => text_response(StatusCode::OK, "ok"),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Internal(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Health server bind error: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

async fn run_metrics_server(
    addr: &str,
    cache: Arc<CacheOrchestrator>,
    metrics: Arc<CacheMetrics>,
    stop: CancellationToken,
) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let cache = cache.clone();
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let cache = cache.clone();
                let metrics = metrics.clone();
                async move {
                    if req.uri().path() != "/metrics" {
                        let response = text_response(StatusCode::NOT_FOUND, "not found");
                        return Ok::<_, Infallible>(response);
                    }
                    let response = match metrics.scrape(&cache).await {
                        Ok(text) => {
                            let mut response = text_response(StatusCode::OK, text);
                            response.headers_mut().insert(
                                CONTENT_TYPE,
                                HeaderValue::from_static(metrics.content_type()),
                            );
                            response
                        }
                        Err(e) => {
                            error!("Metrics scrape failed: {}", e);
                            text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                        }
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Internal(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Metrics server bind error: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
