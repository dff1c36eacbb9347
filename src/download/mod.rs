//! Archive download
//!
//! The export archive is fetched over plain HTTP(S) first. When that fails
//! and the URL addresses an object store bucket, the same object is fetched
//! through the configured [`ObjectStore`] instead. `s3://` URLs go straight
//! to the object store.
//!
//! Bodies are streamed to disk chunk by chunk under a `.part` name and
//! renamed once complete, so an interrupted download never leaves a file
//! that looks like a finished archive.

use crate::config::DownloadConfig;
use crate::error::{DownloadError, Result};
use crate::utils::{filename_from_response, http_client};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

mod object_store;

pub use object_store::{HttpObjectStore, ObjectLocation, ObjectStore};

/// Trait for fetching an export archive to local disk
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` into `dest_dir`, returning the local archive path
    async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf>;

    /// Name of this implementation, for logs
    fn name(&self) -> &'static str;
}

/// Downloader using a direct HTTP GET with an optional object-store fallback
pub struct HttpDownloader {
    client: reqwest::Client,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl HttpDownloader {
    /// Build a downloader from configuration
    ///
    /// The object-store fallback is enabled when `object_store_endpoint` is set.
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let object_store = match &config.object_store_endpoint {
            Some(endpoint) => Some(Arc::new(HttpObjectStore::new(endpoint, config.request_timeout)?)
                as Arc<dyn ObjectStore>),
            None => None,
        };

        Ok(Self {
            client: http_client(config.request_timeout)?,
            object_store,
        })
    }

    /// Use a custom object store for the fallback
    pub fn with_object_store(mut self, object_store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(object_store);
        self
    }

    async fn fetch_http(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        debug!(url, "fetching archive over HTTP");

        let response = self.client.get(url).send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                "request timed out".to_string()
            } else if e.is_connect() {
                format!("connection failed: {}", e)
            } else {
                e.to_string()
            };
            DownloadError::Transfer {
                url: url.to_string(),
                reason,
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DownloadError::AccessDenied {
                url: url.to_string(),
            }
            .into());
        }
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let target = DownloadTarget::new(dest_dir, &filename_from_response(&response, url));
        let bytes = stream_to_file(response, &target, url).await?;

        info!(url, bytes, path = ?target.path(), "archive downloaded");
        Ok(target.path().to_path_buf())
    }

    async fn fetch_from_store(
        &self,
        store: &dyn ObjectStore,
        location: &ObjectLocation,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        info!(%location, store = store.name(), "downloading through object store");
        store.fetch(location, dest_dir).await
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        if url.starts_with("s3://") {
            let location = ObjectLocation::parse(url).ok_or_else(|| DownloadError::InvalidUrl {
                url: url.to_string(),
                reason: "expected s3://<bucket>/<key>".to_string(),
            })?;
            let store = self.object_store.as_deref().ok_or_else(|| DownloadError::InvalidUrl {
                url: url.to_string(),
                reason: "no object store configured".to_string(),
            })?;
            return self.fetch_from_store(store, &location, dest_dir).await;
        }

        let parsed = url::Url::parse(url).map_err(|e| DownloadError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            }
            .into());
        }

        let direct_error = match self.fetch_http(url, dest_dir).await {
            Ok(path) => return Ok(path),
            Err(e) => e,
        };

        if let Some(store) = self.object_store.as_deref()
            && let Some(location) = ObjectLocation::parse(url)
        {
            warn!(
                url,
                error = %direct_error,
                %location,
                "direct download failed, falling back to object store"
            );
            return self.fetch_from_store(store, &location, dest_dir).await;
        }

        Err(direct_error)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Final and in-progress paths of one downloaded file
pub(crate) struct DownloadTarget {
    path: PathBuf,
    part_path: PathBuf,
}

impl DownloadTarget {
    pub(crate) fn new(dest_dir: &Path, file_name: &str) -> Self {
        Self {
            path: dest_dir.join(file_name),
            part_path: dest_dir.join(format!("{}.part", file_name)),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// Stream a response body into `target`, returning the number of bytes written
pub(crate) async fn stream_to_file(
    mut response: reqwest::Response,
    target: &DownloadTarget,
    url: &str,
) -> std::result::Result<u64, DownloadError> {
    let write_error = |path: &Path, source| DownloadError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = target.path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| write_error(dir, e))?;
    }

    let mut file = tokio::fs::File::create(&target.part_path)
        .await
        .map_err(|e| write_error(&target.part_path, e))?;

    let result: std::result::Result<u64, DownloadError> = async {
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| DownloadError::Transfer {
            url: url.to_string(),
            reason: format!("failed to read response body: {}", e),
        })? {
            file.write_all(&chunk)
                .await
                .map_err(|e| write_error(&target.part_path, e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| write_error(&target.part_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| write_error(&target.part_path, e))?;
        Ok(written)
    }
    .await;

    drop(file);

    match result {
        Ok(written) => {
            tokio::fs::rename(&target.part_path, &target.path)
                .await
                .map_err(|e| write_error(&target.path, e))?;
            Ok(written)
        }
        Err(e) => {
            tokio::fs::remove_file(&target.part_path).await.ok();
            Err(e)
        }
    }
}
