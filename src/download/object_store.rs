//! Object-store addressing and the S3-compatible fallback fetch

use super::{DownloadTarget, stream_to_file};
use crate::error::{DownloadError, Result};
use crate::utils::{DEFAULT_ARCHIVE_NAME, http_client};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

/// Bucket and key of an object
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    /// Bucket name
    pub bucket: String,
    /// Object key, percent-decoded
    pub key: String,
}

struct HostPatterns {
    virtual_hosted: Regex,
    path_style: Regex,
}

fn host_patterns() -> Option<&'static HostPatterns> {
    static PATTERNS: OnceLock<Option<HostPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(HostPatterns {
                // bucket.s3.amazonaws.com, bucket.s3.<region>.amazonaws.com, bucket.s3-<region>.amazonaws.com
                virtual_hosted: Regex::new(
                    r"^(?P<bucket>[a-z0-9][a-z0-9.\-]*[a-z0-9])\.s3(?:[.\-][a-z0-9\-]+)?\.amazonaws\.com$",
                )
                .ok()?,
                // s3.amazonaws.com, s3.<region>.amazonaws.com, s3-<region>.amazonaws.com
                path_style: Regex::new(r"^s3(?:[.\-][a-z0-9\-]+)?\.amazonaws\.com$").ok()?,
            })
        })
        .as_ref()
}

impl ObjectLocation {
    /// Create a location from its parts
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Recognize a bucket/key in an `s3://` URL or an S3 HTTP(S) URL
    ///
    /// Returns `None` for URLs that do not address an object store bucket.
    pub fn parse(url: &str) -> Option<Self> {
        if let Some(rest) = url.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/')?;
            let key = urlencoding::decode(key.split(['?', '#']).next()?).ok()?;
            return Self::checked(bucket, key.trim_start_matches('/'));
        }

        let parsed = url::Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        let host = parsed.host_str()?.to_ascii_lowercase();
        let path = urlencoding::decode(parsed.path()).ok()?;
        let path = path.trim_start_matches('/');
        let patterns = host_patterns()?;

        if let Some(caps) = patterns.virtual_hosted.captures(&host) {
            return Self::checked(&caps["bucket"], path);
        }

        if patterns.path_style.is_match(&host) {
            let (bucket, key) = path.split_once('/')?;
            return Self::checked(bucket, key);
        }

        None
    }

    fn checked(bucket: &str, key: &str) -> Option<Self> {
        if bucket.is_empty() || key.is_empty() || key.ends_with('/') {
            return None;
        }
        Some(Self::new(bucket, key))
    }

    /// Last component of the key
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(DEFAULT_ARCHIVE_NAME)
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Trait for fetching an object by bucket and key
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object into `dest_dir`, returning the local file path
    async fn fetch(&self, location: &ObjectLocation, dest_dir: &Path) -> Result<PathBuf>;

    /// Name of this implementation, for logs
    fn name(&self) -> &'static str;
}

/// S3-compatible store fetched with path-style `GET <endpoint>/<bucket>/<key>`
///
/// Requests are unsigned: the bucket must allow the caller's network
/// identity (or the endpoint is a proxy that signs on its behalf).
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpObjectStore {
    /// Create a store for the given endpoint (e.g. "https://s3.us-east-1.amazonaws.com")
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// The URL an object is fetched from
    pub fn object_url(&self, location: &ObjectLocation) -> String {
        let key = location
            .key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}/{}", self.endpoint, location.bucket, key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch(&self, location: &ObjectLocation, dest_dir: &Path) -> Result<PathBuf> {
        let url = self.object_url(location);
        info!(%location, %url, "fetching archive from object store");

        let response = self.client.get(&url).send().await.map_err(|e| {
            DownloadError::Transfer {
                url: location.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DownloadError::AccessDenied {
                url: location.to_string(),
            }
            .into());
        }
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: location.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let target = DownloadTarget::new(dest_dir, location.file_name());
        let bytes = stream_to_file(response, &target, &location.to_string()).await?;
        debug!(%location, bytes, path = ?target.path(), "object fetched");
        Ok(target.path().to_path_buf())
    }

    fn name(&self) -> &'static str {
        "http-object-store"
    }
}
