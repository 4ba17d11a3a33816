//! HTTP fetch client with a read-through disk tier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheMode;
use crate::domain::errors::{ImageError, ImageResult};
use crate::domain::ports::{FetchResponse, ImageFetchPort};

use super::disk_cache::DiskImageCache;

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchClientConfig {
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for FetchClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Fetches image bytes over HTTP.
///
/// `Persistent` requests read through the disk tier and store successful
/// bodies there. `Transient` requests go through a separate client that keeps
/// no idle connections and never touch the disk tier.
pub struct FetchClient {
    persistent: reqwest::Client,
    ephemeral: reqwest::Client,
    disk_cache: Arc<DiskImageCache>,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("disk_cache", &self.disk_cache.cache_dir())
            .finish_non_exhaustive()
    }
}

impl FetchClient {
    /// Creates a fetch client backed by `disk_cache`.
    ///
    /// # Errors
    /// Returns error if an HTTP client cannot be created.
    pub fn new(disk_cache: Arc<DiskImageCache>, config: &FetchClientConfig) -> ImageResult<Self> {
        let persistent = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ImageError::network(format!("Failed to create HTTP client: {e}")))?;

        let ephemeral = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| ImageError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            persistent,
            ephemeral,
            disk_cache,
        })
    }

    async fn download(client: &reqwest::Client, url: &str) -> ImageResult<FetchResponse> {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| ImageError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            debug!(
                url = %url,
                status = status.as_u16(),
                reason = status.canonical_reason().unwrap_or("Unknown"),
                "Image request returned non-success status"
            );
            return Ok(FetchResponse::network(bytes::Bytes::new(), status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImageError::network(format!("Failed to read body: {e}")))?;

        trace!(url = %url, size = bytes.len(), "Downloaded image bytes");
        Ok(FetchResponse::network(bytes, status.as_u16()))
    }
}

#[async_trait]
impl ImageFetchPort for FetchClient {
    async fn fetch(&self, url: &str, mode: CacheMode) -> ImageResult<FetchResponse> {
        match mode {
            CacheMode::Persistent => {
                if let Some(bytes) = self.disk_cache.get(url).await {
                    return Ok(FetchResponse::cached(bytes));
                }

                let response = Self::download(&self.persistent, url).await?;
                if response.is_success()
                    && let Err(e) = self.disk_cache.put(url, &response.bytes).await
                {
                    warn!(url = %url, error = %e, "Failed to cache to disk");
                }
                Ok(response)
            }
            CacheMode::Transient => Self::download(&self.ephemeral, url).await,
        }
    }

    async fn invalidate(&self, url: &str) {
        self.disk_cache.evict(url).await;
    }

    async fn clear_disk(&self) -> ImageResult<()> {
        self.disk_cache.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `body` with `status` to every connection and counts requests.
    async fn serve(
        status: u16,
        body: &'static [u8],
    ) -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let head = format!(
                    "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}/photo.jpg"), hits)
    }

    async fn client() -> (FetchClient, Arc<DiskImageCache>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let disk = Arc::new(
            DiskImageCache::open(temp_dir.path().to_path_buf(), 1024 * 1024)
                .await
                .unwrap(),
        );
        let client = FetchClient::new(disk.clone(), &FetchClientConfig::default()).unwrap();
        (client, disk, temp_dir)
    }

    #[tokio::test]
    async fn test_persistent_reads_through_disk() {
        let (url, hits) = serve(200, b"payload").await;
        let (client, disk, _temp) = client().await;

        let first = client.fetch(&url, CacheMode::Persistent).await.unwrap();
        assert!(first.is_success());
        assert!(!first.from_disk);
        assert!(disk.contains(&url).await);

        let second = client.fetch(&url, CacheMode::Persistent).await.unwrap();
        assert!(second.from_disk);
        assert_eq!(&second.bytes[..], b"payload");
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_bypasses_disk() {
        let (url, hits) = serve(200, b"payload").await;
        let (client, disk, _temp) = client().await;

        let response = client.fetch(&url, CacheMode::Transient).await.unwrap();
        assert_eq!(&response.bytes[..], b"payload");
        assert!(!disk.contains(&url).await);

        client.fetch(&url, CacheMode::Transient).await.unwrap();
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_success_is_not_cached() {
        let (url, _hits) = serve(404, b"missing").await;
        let (client, disk, _temp) = client().await;

        let response = client.fetch(&url, CacheMode::Persistent).await.unwrap();
        assert_eq!(response.status, 404);
        assert!(response.bytes.is_empty());
        assert!(!disk.contains(&url).await);
    }

    #[tokio::test]
    async fn test_disk_write_failure_still_returns_body() {
        let (url, hits) = serve(200, b"payload").await;
        let (client, disk, temp) = client().await;
        std::fs::remove_dir_all(temp.path()).unwrap();

        let response = client.fetch(&url, CacheMode::Persistent).await.unwrap();
        assert!(response.is_success());
        assert!(!response.from_disk);
        assert_eq!(&response.bytes[..], b"payload");
        assert!(disk.is_empty());

        // Nothing was stored, so the next load goes back to the network.
        client.fetch(&url, CacheMode::Persistent).await.unwrap();
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connection_error_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/gone.jpg", listener.local_addr().unwrap());
        drop(listener);

        let (client, _disk, _temp) = client().await;
        let result = client.fetch(&url, CacheMode::Persistent).await;
        assert!(matches!(result, Err(ImageError::Network(_))));
    }
}
