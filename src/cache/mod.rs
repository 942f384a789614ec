pub mod disk;
pub mod sled_cache;

pub use disk::DiskCache;
pub use sled_cache::SledCache;

use crate::config::{CacheBackend, ProxyConfig};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("cache entry corrupt: {0}")]
    Codec(String),
}

/// Point-in-time usage of a cache backend.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub total_size_bytes: u64,
    pub entry_count: usize,
    pub max_size_bytes: u64,
}

/// Byte-payload store addressed by cache key.
///
/// Capacity and retention are the store's business. Callers treat every
/// method as best-effort: a failed `get` is a miss and a failed `put` only
/// costs a future recomputation.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// Get cached payload by key, `None` on miss or expiry
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Store payload; an existing entry for the same key is replaced whole
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Opens the backend selected by `config.cache_backend` under `config.cache_dir`.
pub async fn open_store(config: &ProxyConfig) -> Result<Arc<dyn CacheStore>, CacheError> {
    let store: Arc<dyn CacheStore> = match config.cache_backend {
        CacheBackend::Disk => Arc::new(
            DiskCache::open(config.cache_dir.clone(), config.max_cache_size, config.cache_ttl).await?,
        ),
        CacheBackend::Sled => Arc::new(SledCache::open(
            &config.cache_dir,
            config.max_cache_size,
            config.cache_ttl,
        )?),
    };
    tracing::info!(
        "Cache backend {:?} at {} (max {} bytes, ttl {}s)",
        config.cache_backend,
        config.cache_dir.display(),
        config.max_cache_size,
        config.cache_ttl.as_secs()
    );
    Ok(store)
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
