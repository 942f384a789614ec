#![allow(dead_code)]

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response};
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use imgcache::cache::{CacheError, CacheStats, CacheStore};
use imgcache::config::ProxyConfig;
use imgcache::fetch::{ByteStream, Origin, OriginMetadata};
use imgcache::transform::ImageTranscoder;
use imgcache::{AppState, ProxyError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tower::util::ServiceExt; // for `oneshot`

/// Origin double serving one fixed body for every URL.
pub struct FakeOrigin {
    body: std::result::Result<Vec<u8>, String>,
    last_modified: Option<OffsetDateTime>,
    delay: Duration,
    pub heads: AtomicUsize,
    pub gets: AtomicUsize,
}

impl FakeOrigin {
    pub fn serving(body: Vec<u8>) -> Self {
        Self {
            body: Ok(body),
            last_modified: None,
            delay: Duration::ZERO,
            heads: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self { body: Err(reason.to_string()), ..Self::serving(Vec::new()) }
    }

    pub fn last_modified(mut self, at: OffsetDateTime) -> Self {
        self.last_modified = Some(at);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn heads(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Origin for FakeOrigin {
    async fn fetch_metadata(&self, _url: &str) -> OriginMetadata {
        self.heads.fetch_add(1, Ordering::SeqCst);
        self.last_modified
            .map(|last_modified| OriginMetadata { last_modified })
            .unwrap_or_else(OriginMetadata::now)
    }

    async fn fetch_stream(&self, _url: &str) -> std::result::Result<ByteStream, ProxyError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.body {
            Ok(body) => {
                let chunks: Vec<std::result::Result<Bytes, ProxyError>> = body
                    .chunks(512)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                Ok(futures::stream::iter(chunks).boxed())
            }
            Err(reason) => Err(ProxyError::UpstreamFetch(reason.clone())),
        }
    }
}

/// In-memory store that records every write.
#[derive(Default)]
pub struct MemoryStore {
    pub entries: Mutex<HashMap<String, Bytes>>,
    pub puts: AtomicUsize,
}

impl MemoryStore {
    pub fn entry(&self, key: &str) -> Option<Bytes> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> std::result::Result<Option<Bytes>, CacheError> {
        Ok(self.entry(key))
    }

    async fn put(&self, key: &str, data: &[u8]) -> std::result::Result<(), CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().insert(key.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn stats(&self) -> std::result::Result<CacheStats, CacheError> {
        let entries = self.entries.lock().unwrap();
        Ok(CacheStats {
            total_size_bytes: entries.values().map(|b| b.len() as u64).sum(),
            entry_count: entries.len(),
            max_size_bytes: 1 << 30,
        })
    }
}

/// Store whose disk is always full and whose reads always miss.
pub struct FailingStore;

#[async_trait::async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &str) -> std::result::Result<Option<Bytes>, CacheError> {
        Err(CacheError::Io(std::io::Error::new(std::io::ErrorKind::Other, "read failed")))
    }

    async fn put(&self, _key: &str, _data: &[u8]) -> std::result::Result<(), CacheError> {
        Err(CacheError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
    }

    async fn stats(&self) -> std::result::Result<CacheStats, CacheError> {
        Err(CacheError::Codec("unavailable".into()))
    }
}

pub fn test_config() -> ProxyConfig {
    ProxyConfig { rate_limit: None, ..ProxyConfig::default() }
}

pub fn state(origin: Arc<dyn Origin>, cache: Arc<dyn CacheStore>, config: ProxyConfig) -> AppState {
    AppState::new(config, cache, origin, Arc::new(ImageTranscoder))
}

pub fn app(state: AppState) -> Router {
    imgcache::router(state)
}

/// A `w` x `h` PNG with a gradient so encoders have real content.
pub fn png_source(w: u32, h: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(w, h, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

pub async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

/// GET carrying the peer address the rate limiter keys on.
pub async fn get_from(app: &Router, uri: &str, peer: SocketAddr) -> Response<Body> {
    let mut req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    req.extensions_mut().insert(ConnectInfo(peer));
    send(app, req).await
}

pub async fn body(resp: Response<Body>) -> Bytes {
    axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap()
}

pub fn assert_cors(resp: &Response<Body>) {
    let h = resp.headers();
    assert_eq!(h["access-control-allow-origin"], "*");
    assert_eq!(h["access-control-allow-methods"], "GET, OPTIONS");
    assert_eq!(h["access-control-allow-headers"], "Content-Type");
}
