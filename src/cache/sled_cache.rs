use crate::cache::{unix_now, CacheError, CacheStats, CacheStore};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use std::time::Duration;

/// Metadata stored alongside cached payloads
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheMetadata {
    pub key: String,
    pub size: usize,
    pub created_at: u64,
    pub accessed_at: u64,
}

/// Sled-based cache with LRU eviction
///
/// This cache provides:
/// - Persistent storage in a single embedded database (block compression on)
/// - LRU (Least Recently Used) eviction policy
/// - Retention window measured from each entry's last access
/// - Pure Rust (no C++ compilation needed)
pub struct SledCache {
    db: Db,
    max_size: u64,
    ttl: Duration,
}

impl SledCache {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>, max_size: u64, ttl: Duration) -> Result<Self, CacheError> {
        let db = sled::Config::new()
            .path(path)
            .use_compression(true)
            .open()?;

        Ok(Self { db, max_size, ttl })
    }

    fn metadata_key(key: &str) -> String {
        format!("meta:{}", key)
    }

    fn data_key(key: &str) -> String {
        format!("data:{}", key)
    }

    fn all_metadata(&self) -> Vec<CacheMetadata> {
        self.db
            .scan_prefix(b"meta:")
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice::<CacheMetadata>(&value).ok())
            .collect()
    }

    fn is_expired(&self, meta: &CacheMetadata) -> bool {
        unix_now().saturating_sub(meta.accessed_at) >= self.ttl.as_secs()
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.db.remove(Self::metadata_key(key).as_bytes())?;
        self.db.remove(Self::data_key(key).as_bytes())?;
        Ok(())
    }

    /// Evict least recently used entries until under 90% of the size limit
    fn evict_if_needed(&self) -> Result<(), CacheError> {
        let mut entries = self.all_metadata();
        let current: u64 = entries.iter().map(|m| m.size as u64).sum();

        if current <= self.max_size {
            return Ok(());
        }

        tracing::info!("Cache size {} exceeds limit {}, starting eviction", current, self.max_size);

        // oldest access first
        entries.sort_by_key(|e| e.accessed_at);

        let target_to_free = current.saturating_sub(self.max_size * 90 / 100);
        let mut freed = 0u64;
        let mut evicted_count = 0;

        for entry in entries {
            if freed >= target_to_free {
                break;
            }
            self.remove(&entry.key)?;
            freed += entry.size as u64;
            evicted_count += 1;

            tracing::debug!(
                "Evicted cache entry: key={}, size={}, idle={}s",
                entry.key,
                entry.size,
                unix_now().saturating_sub(entry.accessed_at)
            );
        }

        self.db.flush()?;

        tracing::info!("Eviction complete: freed {} bytes by removing {} entries", freed, evicted_count);
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheStore for SledCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let meta_key = Self::metadata_key(key);

        let mut meta = match self.db.get(meta_key.as_bytes())? {
            Some(raw) => serde_json::from_slice::<CacheMetadata>(&raw)
                .map_err(|e| CacheError::Codec(e.to_string()))?,
            None => return Ok(None),
        };

        if self.is_expired(&meta) {
            tracing::debug!("Cache entry expired: key={}", key);
            self.remove(key)?;
            return Ok(None);
        }

        let data = match self.db.get(Self::data_key(key).as_bytes())? {
            Some(d) => Bytes::copy_from_slice(&d),
            None => return Ok(None),
        };

        // Update access time (cache hit)
        meta.accessed_at = unix_now();
        match serde_json::to_vec(&meta) {
            Ok(encoded) => {
                if let Err(e) = self.db.insert(meta_key.as_bytes(), encoded) {
                    tracing::warn!("Failed to record access for key={}: {}", key, e);
                }
            }
            Err(e) => tracing::warn!("Failed to encode metadata for key={}: {}", key, e),
        }

        Ok(Some(data))
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let now = unix_now();
        let metadata = CacheMetadata {
            key: key.to_string(),
            size: data.len(),
            created_at: now,
            accessed_at: now,
        };
        let encoded = serde_json::to_vec(&metadata).map_err(|e| CacheError::Codec(e.to_string()))?;

        // data and metadata land together or not at all
        let mut batch = sled::Batch::default();
        batch.insert(Self::data_key(key).as_bytes(), data);
        batch.insert(Self::metadata_key(key).as_bytes(), encoded);
        self.db.apply_batch(batch)?;

        self.db.flush_async().await?;
        self.evict_if_needed()
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.all_metadata();
        Ok(CacheStats {
            total_size_bytes: entries.iter().map(|m| m.size as u64).sum(),
            entry_count: entries.len(),
            max_size_bytes: self.max_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YEAR: Duration = Duration::from_secs(365 * 24 * 3600);

    #[tokio::test]
    async fn roundtrip_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SledCache::open(dir.path(), 1 << 20, YEAR).unwrap();

        assert!(cache.get("k1").await.unwrap().is_none());
        cache.put("k1", b"first").await.unwrap();
        cache.put("k2", b"second!").await.unwrap();

        assert_eq!(&cache.get("k1").await.unwrap().unwrap()[..], b"first");
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.total_size_bytes, 12);
        assert_eq!(stats.max_size_bytes, 1 << 20);
    }

    #[tokio::test]
    async fn overwrite_replaces_whole_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SledCache::open(dir.path(), 1 << 20, YEAR).unwrap();
        cache.put("k", b"aaaa").await.unwrap();
        cache.put("k", b"bb").await.unwrap();

        assert_eq!(&cache.get("k").await.unwrap().unwrap()[..], b"bb");
        assert_eq!(cache.stats().await.unwrap().total_size_bytes, 2);
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SledCache::open(dir.path(), 1 << 20, Duration::ZERO).unwrap();
        cache.put("k", b"gone").await.unwrap();

        assert!(cache.get("k").await.unwrap().is_none());
        assert_eq!(cache.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn hit_records_access_time() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SledCache::open(dir.path(), 1 << 20, Duration::from_secs(3600)).unwrap();
        cache.put("k", b"kept").await.unwrap();

        // written long ago, read a minute ago: still inside the window
        let idle = CacheMetadata { key: "k".into(), size: 4, created_at: 1, accessed_at: unix_now() - 60 };
        cache.db.insert(b"meta:k", serde_json::to_vec(&idle).unwrap()).unwrap();
        assert!(cache.get("k").await.unwrap().is_some());

        let raw = cache.db.get(b"meta:k").unwrap().unwrap();
        let meta: CacheMetadata = serde_json::from_slice(&raw).unwrap();
        assert!(meta.accessed_at >= unix_now() - 5);
        assert_eq!(meta.created_at, 1);
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SledCache::open(dir.path(), 250, YEAR).unwrap();

        cache.put("old", &[1u8; 100]).await.unwrap();
        // backdate access so "old" is unambiguously the LRU entry
        let stale = CacheMetadata { key: "old".into(), size: 100, created_at: unix_now(), accessed_at: 1 };
        cache.db.insert(b"meta:old", serde_json::to_vec(&stale).unwrap()).unwrap();

        cache.put("mid", &[2u8; 100]).await.unwrap();
        cache.put("new", &[3u8; 100]).await.unwrap();

        assert!(cache.get("old").await.unwrap().is_none());
        assert!(cache.get("mid").await.unwrap().is_some());
        assert!(cache.get("new").await.unwrap().is_some());
    }
}
