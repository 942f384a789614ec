use crate::cache::{CacheError, CacheStats, CacheStore};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::fs;

const ENTRY_EXT: &str = "gz";

/// File-per-entry cache on local disk.
///
/// Layout: `<dir>/<k0k1>/<k2k3>/<key>.gz`, each file a gzip stream of the
/// payload. Writes land in a unique temp file that is renamed over the entry,
/// so readers never observe a half-written payload and concurrent writers of
/// one key resolve to whichever rename happened last.
///
/// A hit refreshes the entry's mtime, so mtime is the time of last use.
///
/// Limits:
/// - Retention: an entry unused for longer than `ttl` is deleted on read
/// - Capacity: when tracked usage exceeds `max_size` after a write, the
///   least recently used entries are removed until usage is at 90% of the limit
pub struct DiskCache {
    dir: PathBuf,
    max_size: u64,
    ttl: Duration,
    usage: AtomicU64,
    tmp_seq: AtomicU64,
    sweep: tokio::sync::Mutex<()>,
}

struct EntryFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

impl DiskCache {
    /// Creates `dir` if needed and measures what is already stored there.
    pub async fn open(dir: PathBuf, max_size: u64, ttl: Duration) -> Result<Self, CacheError> {
        fs::create_dir_all(&dir).await?;
        let usage = scan(&dir).await?.iter().map(|e| e.size).sum();

        Ok(Self {
            dir,
            max_size,
            ttl,
            usage: AtomicU64::new(usage),
            tmp_seq: AtomicU64::new(0),
            sweep: tokio::sync::Mutex::new(()),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        if key.len() < 4 || !key.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(CacheError::Codec(format!("invalid cache key {:?}", key)));
        }
        Ok(self
            .dir
            .join(&key[0..2])
            .join(&key[2..4])
            .join(format!("{}.{}", key, ENTRY_EXT)))
    }

    fn tmp_path_for(&self, path: &Path) -> PathBuf {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        path.with_extension(format!("{}.{}.{}.tmp", ENTRY_EXT, std::process::id(), seq))
    }

    fn is_expired(&self, meta: &std::fs::Metadata) -> bool {
        meta.modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .is_some_and(|age| age >= self.ttl)
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |u| Some(u.saturating_sub(bytes)));
    }

    async fn remove_entry(&self, path: &Path, size: u64) {
        match fs::remove_file(path).await {
            Ok(()) => self.release(size),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove cache entry {}: {}", path.display(), e),
        }
    }

    async fn touch(&self, path: &Path) {
        let target = path.to_path_buf();
        let refreshed = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::File::options()
                .write(true)
                .open(&target)?
                .set_modified(SystemTime::now())
        })
        .await;

        match refreshed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Failed to refresh cache entry {}: {}", path.display(), e),
            Err(e) => tracing::warn!("Refresh task for {} failed: {}", path.display(), e),
        }
    }

    /// Rescans the directory and drops oldest entries until under 90% of `max_size`.
    async fn evict_if_needed(&self) -> Result<(), CacheError> {
        let _guard = self.sweep.lock().await;

        let mut entries = scan(&self.dir).await?;
        let current: u64 = entries.iter().map(|e| e.size).sum();
        self.usage.store(current, Ordering::Relaxed);

        if current <= self.max_size {
            return Ok(());
        }

        tracing::info!("Cache size {} exceeds limit {}, starting eviction", current, self.max_size);

        entries.sort_by_key(|e| e.modified);
        let target = self.max_size * 90 / 100;
        let mut remaining = current;
        let mut evicted = 0usize;

        for entry in entries {
            if remaining <= target {
                break;
            }
            self.remove_entry(&entry.path, entry.size).await;
            remaining = remaining.saturating_sub(entry.size);
            evicted += 1;
        }

        tracing::info!(
            "Eviction complete: freed {} bytes by removing {} entries",
            current - remaining,
            evicted
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheStore for DiskCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let path = self.path_for(key)?;
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if self.is_expired(&meta) {
            tracing::debug!("Cache entry expired: key={}", key);
            self.remove_entry(&path, meta.len()).await;
            return Ok(None);
        }

        let compressed = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match decompress(&compressed) {
            Ok(data) => {
                self.touch(&path).await;
                Ok(Some(Bytes::from(data)))
            }
            Err(e) => {
                self.remove_entry(&path, meta.len()).await;
                Err(e)
            }
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        let compressed = compress(data)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.tmp_path_for(&path);
        if let Err(e) = fs::write(&tmp, &compressed).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        let previous = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        self.release(previous);
        let usage = self.usage.fetch_add(compressed.len() as u64, Ordering::Relaxed)
            + compressed.len() as u64;
        if usage > self.max_size {
            self.evict_if_needed().await?;
        }
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = scan(&self.dir).await?;
        Ok(CacheStats {
            total_size_bytes: entries.iter().map(|e| e.size).sum(),
            entry_count: entries.len(),
            max_size_bytes: self.max_size,
        })
    }
}

fn compress(data: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut enc = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::fast());
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut out = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Codec(e.to_string()))?;
    Ok(out)
}

/// Every committed entry file below `dir` (temp files are skipped).
async fn scan(dir: &Path) -> Result<Vec<EntryFile>, CacheError> {
    let mut entries = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut read_dir = match fs::read_dir(&current).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(item) = read_dir.next_entry().await? {
            let meta = match item.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue, // removed concurrently
            };
            let path = item.path();
            if meta.is_dir() {
                pending.push(path);
            } else if meta.is_file() && path.extension().is_some_and(|ext| ext == ENTRY_EXT) {
                entries.push(EntryFile {
                    path,
                    size: meta.len(),
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                });
            }
        }
    }

    Ok(entries)
}
