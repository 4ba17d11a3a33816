//! Disk tier: raw response bytes persisted across launches.
//!
//! Entries are keyed by request identity (the fetched URL) and hold the
//! undecoded payload. The tier is bounded by a byte budget; when exceeded it
//! drops the least recently used files until 90% of the budget remains.
//! A hit refreshes the file's modification time, which is the recency clock.
//!
//! Reads never wait on each other. Mutations (commit, evict, clear, trim)
//! run one at a time under `write_lock` so the byte and entry counters match
//! the files on disk.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::domain::errors::{ImageError, ImageResult};

/// Default disk budget (180 MiB).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 180 * 1024 * 1024;

const ENTRY_EXTENSION: &str = "img";
const TEMP_EXTENSION: &str = "part";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Byte-budgeted store of raw image payloads.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: u64,
    current_size: AtomicU64,
    item_count: AtomicUsize,
    write_lock: Mutex<()>,
}

impl DiskImageCache {
    /// Opens (or creates) a disk cache in `cache_dir`.
    ///
    /// Existing entries are counted towards the budget; leftover partial
    /// writes are removed.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or listed.
    pub async fn open(cache_dir: PathBuf, max_size: u64) -> ImageResult<Self> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| ImageError::io(format!("Failed to create cache dir: {e}")))?;

        let mut total_size = 0u64;
        let mut count = 0usize;

        let mut entries = fs::read_dir(&cache_dir)
            .await
            .map_err(|e| ImageError::io(format!("Failed to read cache dir: {e}")))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if has_extension(&path, TEMP_EXTENSION) {
                let _ = fs::remove_file(&path).await;
            } else if has_extension(&path, ENTRY_EXTENSION)
                && let Ok(meta) = entry.metadata().await
            {
                total_size += meta.len();
                count += 1;
            }
        }

        let cache = Self {
            cache_dir,
            max_size,
            current_size: AtomicU64::new(total_size),
            item_count: AtomicUsize::new(count),
            write_lock: Mutex::new(()),
        };

        debug!(
            dir = %cache.cache_dir.display(),
            size = total_size,
            count,
            "Opened disk image cache"
        );

        {
            let _guard = cache.write_lock.lock().await;
            cache.trim_locked().await;
        }

        Ok(cache)
    }

    /// Returns the directory backing this cache.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the configured budget in bytes.
    #[must_use]
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    fn cache_path(&self, request: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{ENTRY_EXTENSION}", request_digest(request)))
    }

    /// Returns the stored payload for `request`, refreshing its recency.
    pub async fn get(&self, request: &str) -> Option<Bytes> {
        let path = self.cache_path(request);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(request = %request, path = %path.display(), "Disk cache hit");
                touch(&path).await;
                Some(Bytes::from(bytes))
            }
            Err(_) => {
                trace!(request = %request, "Disk cache miss");
                None
            }
        }
    }

    /// Stores the payload for `request`.
    ///
    /// The write goes to a temporary file that is renamed into place, so a
    /// reader never sees a partial entry.
    ///
    /// # Errors
    /// Returns error if the file cannot be created or written.
    pub async fn put(&self, request: &str, bytes: &[u8]) -> ImageResult<()> {
        let path = self.cache_path(request);
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("{seq}.{TEMP_EXTENSION}"));

        if let Err(e) = write_temp(&temp_path, bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        let _guard = self.write_lock.lock().await;

        let old_size = fs::metadata(&path).await.map(|m| m.len()).ok();
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ImageError::io(format!("Failed to commit cache file: {e}")));
        }

        let new_size = bytes.len() as u64;
        match old_size {
            Some(old) => {
                self.shrink(old, 0);
                self.current_size.fetch_add(new_size, Ordering::Relaxed);
            }
            None => {
                self.current_size.fetch_add(new_size, Ordering::Relaxed);
                self.item_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        debug!(request = %request, size = bytes.len(), "Stored payload in disk cache");

        self.trim_locked().await;

        Ok(())
    }

    /// Removes the entry for `request`.
    pub async fn evict(&self, request: &str) {
        let path = self.cache_path(request);
        let _guard = self.write_lock.lock().await;

        let size = fs::metadata(&path).await.map(|m| m.len()).ok();
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(request = %request, error = %e, "Failed to evict from disk cache");
            }
        } else if let Some(s) = size {
            self.shrink(s, 1);
            debug!(request = %request, "Evicted from disk cache");
        }
    }

    /// Clears the entire disk cache.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be read.
    pub async fn clear(&self) -> ImageResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut entries = fs::read_dir(&self.cache_dir)
            .await
            .map_err(|e| ImageError::io(format!("Failed to read cache dir: {e}")))?;

        let (mut kept_size, mut kept_count) = (0u64, 0usize);
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ImageError::io(format!("Failed to read entry: {e}")))?
        {
            let path = entry.path();
            if !has_extension(&path, ENTRY_EXTENSION) {
                continue;
            }
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove cache file");
                if let Ok(meta) = entry.metadata().await {
                    kept_size += meta.len();
                    kept_count += 1;
                }
            }
        }
        self.current_size.store(kept_size, Ordering::Relaxed);
        self.item_count.store(kept_count, Ordering::Relaxed);
        debug!(kept_count, "Cleared disk cache");
        Ok(())
    }

    /// Returns the current cache size in bytes.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Returns the number of cached files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks if a payload is cached for `request`.
    pub async fn contains(&self, request: &str) -> bool {
        fs::try_exists(self.cache_path(request))
            .await
            .unwrap_or(false)
    }

    /// Subtracts `size` bytes and `count` entries without wrapping.
    fn shrink(&self, size: u64, count: usize) {
        let _ = self
            .current_size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(size))
            });
        let _ = self
            .item_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(count))
            });
    }

    /// Drops least recently used entries until 90% of the budget remains.
    /// Callers hold `write_lock`.
    async fn trim_locked(&self) {
        let current_size = self.current_size();
        if current_size <= self.max_size {
            return;
        }

        debug!(
            current_size,
            max_size = self.max_size,
            "Disk cache over limit, cleaning up"
        );

        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return;
        };

        let mut files: Vec<(PathBuf, SystemTime, u64)> = Vec::new();

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !has_extension(&path, ENTRY_EXTENSION) {
                continue;
            }

            if let Ok(meta) = entry.metadata().await {
                let used = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((path, used, meta.len()));
            }
        }

        files.sort_by_key(|(_, time, _)| *time);

        let mut freed_size = 0u64;
        let mut freed_count = 0usize;
        let target = current_size - self.max_size + (self.max_size / 10);

        for (path, _, size) in files {
            if freed_size >= target {
                break;
            }

            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
            } else {
                trace!(path = %path.display(), "Removed old cache file");
                freed_size += size;
                freed_count += 1;
            }
        }
        self.shrink(freed_size, freed_count);

        debug!(freed_size, freed_count, "Disk cache cleanup complete");
    }
}

async fn write_temp(path: &Path, bytes: &[u8]) -> ImageResult<()> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| ImageError::io(format!("Failed to create cache file: {e}")))?;
    file.write_all(bytes)
        .await
        .map_err(|e| ImageError::io(format!("Failed to write cache file: {e}")))?;
    file.flush()
        .await
        .map_err(|e| ImageError::io(format!("Failed to flush cache file: {e}")))
}

/// Returns the file-name digest for a request identity.
#[must_use]
pub fn request_digest(request: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"GET ");
    hasher.update(request.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e == ext)
}

async fn touch(path: &Path) {
    let result = async {
        let file = fs::OpenOptions::new().write(true).open(path).await?;
        file.into_std().await.set_modified(SystemTime::now())
    }
    .await;
    if let Err(e) = result {
        trace!(path = %path.display(), error = %e, "Failed to refresh cache entry time");
    }
}
