use crate::config::{OutputFormat, GREETING_CACHE_CONTROL, IMAGE_CACHE_CONTROL};
use crate::key::Validator;
use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;

pub const GREETING: &str = "Hello, 世界! This is a simple image transformation service.";

const ALLOW_ORIGIN: &str = "*";
const ALLOW_METHODS: &str = "GET, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type";

/// Stamps the permissive CORS trio onto `headers`, replacing existing values.
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static(ALLOW_ORIGIN));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
}

/// Axum middleware that answers preflights and adds CORS headers everywhere.
///
/// # Behavior
/// - `OPTIONS` on any path: 204 with the CORS headers and an empty body; the
///   inner service is never called
/// - Anything else: the inner response (success, 304, error, 404, rate
///   limited) gets the CORS headers added
pub async fn cors_middleware(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors(response.headers_mut());
        return response;
    }

    let mut response = next.run(req).await;
    apply_cors(response.headers_mut());
    response
}

/// 200 with the fixed greeting, served when no source URL was given.
pub fn greeting() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(GREETING_CACHE_CONTROL));
    if let Ok(ct) = HeaderValue::from_str(mime::TEXT_PLAIN_UTF_8.as_ref()) {
        headers.insert(header::CONTENT_TYPE, ct);
    }
    (StatusCode::OK, headers, GREETING).into_response()
}

/// 304 without a body; validators are still sent.
pub fn not_modified(validator: &Validator, last_modified: &str) -> Response {
    let mut headers = HeaderMap::new();
    insert_validators(&mut headers, validator, last_modified);
    (StatusCode::NOT_MODIFIED, headers).into_response()
}

/// 200 with an encoded image, cached or fresh.
pub fn image(bytes: Bytes, format: OutputFormat, validator: &Validator, last_modified: &str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(IMAGE_CACHE_CONTROL));
    insert_validators(&mut headers, validator, last_modified);
    (StatusCode::OK, headers, Body::from(bytes)).into_response()
}

fn insert_validators(headers: &mut HeaderMap, validator: &Validator, last_modified: &str) {
    // Both values are printable ASCII by construction, except an echoed
    // If-Modified-Since, which axum already accepted as a header value.
    if let Ok(etag) = HeaderValue::from_str(validator.as_str()) {
        headers.insert(header::ETAG, etag);
    }
    if let Ok(lm) = HeaderValue::from_str(last_modified) {
        headers.insert(header::LAST_MODIFIED, lm);
    }
}
