use crate::conditional::{fmt_http_date, is_not_modified, not_modified_since};
use crate::key::{self, CacheKey};
use crate::transform::{QueryParams, TransformRequest};
use crate::{response, AppState, Metrics, ProxyError};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use time::OffsetDateTime;

/// A freshly produced image and the `Last-Modified` to serve with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Produced {
    pub bytes: Bytes,
    pub last_modified: String,
}

/// What one fetch+transform+store run yields; shared between coalesced callers.
pub type Outcome = Result<Produced, ProxyError>;

/// `GET /` — the whole request-to-cache pipeline.
///
/// Terminal points, in order:
/// 1. no `url`: greeting
/// 2. `If-None-Match` equals the computed ETag: 304
/// 3. cache hit: 200 with stored bytes
/// 4. body fetch fails: 400
/// 5. transform fails: 500
/// 6. otherwise: store (best effort) and 200 with fresh bytes
///
/// Origin metadata is fetched best-effort between 3 and 4 and never ends the
/// request.
pub async fn proxy_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<QueryParams>,
) -> Response {
    Metrics::incr(&state.metrics.requests);

    let Some(req) = TransformRequest::from_query(&query) else {
        return response::greeting();
    };

    tracing::debug!(
        "Processing image request: url={}, w={:?}, h={:?}, quality={}, output={}",
        req.url, req.width, req.height, req.quality, req.format
    );

    let (key, validator) = key::derive(&req);

    let if_none_match = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok());
    if is_not_modified(if_none_match, &validator) {
        Metrics::incr(&state.metrics.not_modified);
        tracing::debug!("Not modified: key={}", key);
        let since = headers.get(header::IF_MODIFIED_SINCE).and_then(|v| v.to_str().ok());
        let last_modified = not_modified_since(since, OffsetDateTime::now_utc());
        return response::not_modified(&validator, &last_modified);
    }

    match state.cache.get(key.as_str()).await {
        Ok(Some(bytes)) => {
            Metrics::incr(&state.metrics.cache_hits);
            tracing::info!("Cache hit for key={}", key);
            let last_modified = fmt_http_date(OffsetDateTime::now_utc());
            return response::image(bytes, req.format, &validator, &last_modified);
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Cache read failed for key={}, treating as miss: {}", key, e),
    }

    Metrics::incr(&state.metrics.cache_misses);
    tracing::info!("Cache miss for key={}, fetching from {}", key, req.url);

    let outcome = if state.config.coalesce_requests {
        let shared = state.flights.run(key.as_str(), || produce(&state, &req, &key)).await;
        if shared.joined {
            Metrics::incr(&state.metrics.coalesced);
            tracing::debug!("Joined in-flight transformation for key={}", key);
        }
        shared.value
    } else {
        produce(&state, &req, &key).await
    };

    match outcome {
        Ok(produced) => response::image(produced.bytes, req.format, &validator, &produced.last_modified),
        Err(e) => {
            Metrics::incr(&state.metrics.errors);
            tracing::error!("Failed to serve {}: {}", req.url, e);
            e.into_response()
        }
    }
}

/// Metadata, body, transform, store. The store step cannot fail the request.
async fn produce(state: &AppState, req: &TransformRequest, key: &CacheKey) -> Outcome {
    let metadata = state.origin.fetch_metadata(&req.url).await;
    let stream = state.origin.fetch_stream(&req.url).await?;

    Metrics::incr(&state.metrics.transforms);
    let bytes = state.pipeline.transform(stream, req).await?;

    if let Err(e) = state.cache.put(key.as_str(), &bytes).await {
        Metrics::incr(&state.metrics.cache_write_failures);
        tracing::warn!("Failed to cache transformed image for key={}: {}", key, e);
        // Continue anyway - we can still serve the image
    }

    Ok(Produced {
        bytes,
        last_modified: fmt_http_date(metadata.last_modified),
    })
}
