//! Export requests against the remote bulk-export API
//!
//! The remote side answers an export request with either a signed download
//! URL or an object prefix inside the bucket it writes exports to. The job
//! itself runs asynchronously on the remote side; the pipeline waits for it
//! (see `ExportConfig::job_wait`) before downloading.

use crate::config::ExportConfig;
use crate::error::{Error, ExportError, Result};
use crate::utils::http_client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// What to export
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Segment whose users are exported
    pub segment_id: String,
    /// Fields to include for every user; empty lets the remote pick its default set
    #[serde(default)]
    pub fields: Vec<String>,
}

impl ExportRequest {
    /// Export request for a segment with the given fields
    pub fn new(segment_id: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            segment_id: segment_id.into(),
            fields,
        }
    }
}

/// Where the remote will put the finished export
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportLocation {
    /// Direct download URL, if the remote returned one
    pub download_url: Option<String>,
    /// Object prefix inside the export bucket, if the remote returned one
    pub object_prefix: Option<String>,
}

impl ExportLocation {
    /// The URL to download the archive from
    ///
    /// Prefers the direct URL; otherwise builds `s3://<bucket>/<prefix>.zip`
    /// when a bucket is known.
    pub fn resolve(&self, bucket: Option<&str>) -> std::result::Result<String, ExportError> {
        if let Some(url) = self.download_url.as_deref().filter(|u| !u.is_empty()) {
            return Ok(url.to_string());
        }

        match (bucket, self.object_prefix.as_deref()) {
            (Some(bucket), Some(prefix)) if !bucket.is_empty() && !prefix.is_empty() => {
                let prefix = prefix.trim_matches('/');
                let key = if prefix.ends_with(".zip") {
                    prefix.to_string()
                } else {
                    format!("{}.zip", prefix)
                };
                Ok(format!("s3://{}/{}", bucket, key))
            }
            _ => Err(ExportError::MissingLocation),
        }
    }
}

/// Trait for requesting a bulk export
#[async_trait]
pub trait ExportRequester: Send + Sync {
    /// Ask the remote to start exporting; returns where the result will land
    ///
    /// An export already running for the same segment is reported as
    /// [`ExportError::AlreadyInProgress`].
    async fn request_export(&self, request: &ExportRequest) -> Result<ExportLocation>;

    /// Name of this implementation, for logs
    fn name(&self) -> &'static str;
}

#[derive(Serialize)]
struct SegmentExportBody<'a> {
    segment_id: &'a str,
    fields_to_export: &'a [String],
}

#[derive(Debug, Default, Deserialize)]
struct SegmentExportResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    object_prefix: Option<String>,
}

/// Export requester speaking to the REST export endpoint
///
/// `POST <endpoint>/users/export/segment` with
/// `{"segment_id": .., "fields_to_export": [..]}`.
pub struct HttpExportRequester {
    client: reqwest::Client,
    url: String,
    api_token: Option<String>,
}

impl HttpExportRequester {
    /// Build a requester from configuration; `export.endpoint` is required
    pub fn new(config: &ExportConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::config("export.endpoint", "export.endpoint is required to request an export"))?;

        Ok(Self {
            client: http_client(config.request_timeout)?,
            url: format!("{}/users/export/segment", endpoint.trim_end_matches('/')),
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl ExportRequester for HttpExportRequester {
    async fn request_export(&self, request: &ExportRequest) -> Result<ExportLocation> {
        info!(
            segment_id = %request.segment_id,
            fields = request.fields.len(),
            "requesting segment export"
        );

        let body = SegmentExportBody {
            segment_id: &request.segment_id,
            fields_to_export: &request.fields,
        };

        let mut builder = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                format!("timeout requesting export from '{}'", self.url)
            } else if e.is_connect() {
                format!("connection failed for '{}': {}", self.url, e)
            } else {
                format!("failed to request export from '{}': {}", self.url, e)
            };
            ExportError::Transport(reason)
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            ExportError::Transport(format!("failed to read export response: {}", e))
        })?;
        let parsed: SegmentExportResponse = serde_json::from_str(&text).unwrap_or_default();
        let message = parsed
            .message
            .clone()
            .unwrap_or_else(|| text.trim().to_string());

        if !status.is_success() {
            let error = classify_rejection(status.as_u16(), message);
            warn!(segment_id = %request.segment_id, error = %error, "export request rejected");
            return Err(error.into());
        }

        let location = ExportLocation {
            download_url: parsed.url,
            object_prefix: parsed.object_prefix,
        };

        // Some deployments answer 2xx with only a message when a job is running
        if location.download_url.is_none()
            && location.object_prefix.is_none()
            && mentions_in_progress(&message)
        {
            return Err(ExportError::AlreadyInProgress { message }.into());
        }

        debug!(
            segment_id = %request.segment_id,
            has_url = location.download_url.is_some(),
            object_prefix = ?location.object_prefix,
            "export accepted"
        );
        Ok(location)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Map a non-success export response to an [`ExportError`]
///
/// HTTP 409, or any rejection whose message says an export is already
/// running, is the retry-later condition.
pub fn classify_rejection(status: u16, message: String) -> ExportError {
    if status == 409 || mentions_in_progress(&message) {
        ExportError::AlreadyInProgress { message }
    } else {
        ExportError::Rejected { status, message }
    }
}

fn mentions_in_progress(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("in progress") || lower.contains("already running")
}
