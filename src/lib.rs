use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod conditional;
pub mod config;
pub mod fetch;
pub mod flight;
pub mod handler;
pub mod key;
pub mod pipeline;
pub mod response;
pub mod transform;

use crate::cache::{CacheError, CacheStore};
use crate::config::{ConfigError, ProxyConfig};
use crate::fetch::{HttpOrigin, Origin};
use crate::flight::InFlight;
use crate::handler::Outcome;
use crate::pipeline::TransformPipeline;
use crate::transform::{ImageTranscoder, TransformError, Transcoder};

/// Failures that end a request. Cloneable so one coalesced computation can
/// hand the same error to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(String),
    #[error("source image exceeds {limit} bytes")]
    InputTooLarge { limit: usize },
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamFetch(_) | ProxyError::InputTooLarge { .. } => StatusCode::BAD_REQUEST,
            ProxyError::Transform(_) | ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    /// Plain-text body; the detailed cause only goes to the logs.
    fn into_response(self) -> Response {
        let message = match &self {
            ProxyError::UpstreamFetch(_) => "Failed to fetch image",
            ProxyError::InputTooLarge { .. } => "Source image exceeds size limit",
            ProxyError::Transform(_) => "Failed to transform image",
            ProxyError::Internal(_) => "Internal server error",
        };
        (self.status(), message).into_response()
    }
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("http client: {0}")]
    Client(#[from] ProxyError),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Process-wide request counters, exported on `/metrics` and `/stats`.
#[derive(Debug, Default)]
pub struct Metrics {
    pub requests: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub not_modified: AtomicU64,
    pub transforms: AtomicU64,
    pub coalesced: AtomicU64,
    pub cache_write_failures: AtomicU64,
    pub errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Hits as a percentage of cache lookups, 0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Everything a request needs, injected once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub cache: Arc<dyn CacheStore>,
    pub origin: Arc<dyn Origin>,
    pub pipeline: TransformPipeline,
    pub flights: Arc<InFlight<Outcome>>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wires explicit collaborators; tests pass doubles here.
    pub fn new(
        config: ProxyConfig,
        cache: Arc<dyn CacheStore>,
        origin: Arc<dyn Origin>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let pipeline = TransformPipeline::new(transcoder, config.max_input_size);
        Self {
            config: Arc::new(config),
            cache,
            origin,
            pipeline,
            flights: Arc::new(InFlight::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Production wiring: configured cache backend, HTTP origin, `image` transcoder.
    pub async fn from_config(config: ProxyConfig) -> std::result::Result<Self, StartupError> {
        config.validate()?;
        let cache = cache::open_store(&config).await?;
        let origin = Arc::new(HttpOrigin::new(config.fetch_timeout)?);
        Ok(Self::new(config, cache, origin, Arc::new(ImageTranscoder)))
    }
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": env!("CARGO_PKG_NAME"),
    }))
}

/// Counters plus the cache backend's own view of its size.
async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    let m = &state.metrics;
    let cache = match state.cache.stats().await {
        Ok(stats) => json!({
            "total_size_bytes": stats.total_size_bytes,
            "total_size_mb": stats.total_size_bytes as f64 / 1024.0 / 1024.0,
            "entry_count": stats.entry_count,
            "max_size_bytes": stats.max_size_bytes,
            "usage_percent": if stats.max_size_bytes > 0 {
                (stats.total_size_bytes as f64 / stats.max_size_bytes as f64) * 100.0
            } else {
                0.0
            },
        }),
        Err(e) => {
            tracing::warn!("Cache stats unavailable: {}", e);
            json!({ "error": e.to_string() })
        }
    };

    Json(json!({
        "requests": {
            "total": m.requests.load(Ordering::Relaxed),
            "cache_hits": m.cache_hits.load(Ordering::Relaxed),
            "cache_misses": m.cache_misses.load(Ordering::Relaxed),
            "not_modified": m.not_modified.load(Ordering::Relaxed),
            "hit_rate_percent": m.hit_rate(),
        },
        "transforms": {
            "total": m.transforms.load(Ordering::Relaxed),
            "coalesced": m.coalesced.load(Ordering::Relaxed),
            "errors": m.errors.load(Ordering::Relaxed),
            "cache_write_failures": m.cache_write_failures.load(Ordering::Relaxed),
        },
        "cache": cache,
    }))
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let m = &state.metrics;
    let counters = [
        ("requests", "Total number of image requests", &m.requests),
        ("cache_hits", "Total number of cache hits", &m.cache_hits),
        ("cache_misses", "Total number of cache misses", &m.cache_misses),
        ("not_modified", "Total number of 304 responses", &m.not_modified),
        ("transforms", "Total number of image transformations", &m.transforms),
        ("coalesced", "Requests served by joining an in-flight transformation", &m.coalesced),
        ("cache_write_failures", "Failed cache writes", &m.cache_write_failures),
        ("errors", "Total number of failed requests", &m.errors),
    ];

    let mut body = String::new();
    for (name, help, counter) in counters {
        body.push_str(&format!(
            "# HELP imgcache_{name}_total {help}\n\
             # TYPE imgcache_{name}_total counter\n\
             imgcache_{name}_total {}\n",
            counter.load(Ordering::Relaxed)
        ));
    }

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        body,
    )
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

/// Builds the complete application: image route, observability routes, CORS
/// on every response, request tracing.
pub fn router(state: AppState) -> Router {
    // Observability endpoints - NO rate limiting
    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler));

    let mut transform_routes = Router::new().route("/", get(handler::proxy_handler));

    if let Some(limit) = state.config.rate_limit {
        // governor takes the refill period of one slot, not a rate
        let governor_conf = GovernorConfigBuilder::default()
            .per_millisecond(limit.replenish_interval().as_millis() as u64)
            .burst_size(limit.burst)
            .finish();

        match governor_conf {
            Some(conf) => {
                tracing::info!(
                    "Router configured with rate limiting: {}/sec, burst {}",
                    limit.per_second,
                    limit.burst
                );
                transform_routes = transform_routes.layer(GovernorLayer {
                    config: Box::leak(Box::new(conf)),
                });
            }
            None => tracing::warn!("Rejected rate limit settings {:?}; rate limiting disabled", limit),
        }
    }

    Router::new()
        .merge(observability_routes)
        .merge(transform_routes)
        .fallback(not_found)
        .layer(middleware::from_fn(response::cors_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
