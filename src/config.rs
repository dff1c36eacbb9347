//! Configuration types for export-chunker

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Limits applied to one processing invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingLimits {
    /// Stop after this many records in total (default: 1,000,000)
    #[serde(default = "default_max_records")]
    pub max_total_records: u64,

    /// Roll over to a new chunk file after this many records (default: 1,000,000)
    #[serde(default = "default_max_records")]
    pub max_records_per_chunk: u64,
}

impl Default for ProcessingLimits {
    fn default() -> Self {
        Self {
            max_total_records: default_max_records(),
            max_records_per_chunk: default_max_records(),
        }
    }
}

impl ProcessingLimits {
    /// Limits with the given per-chunk size and the default global cap
    pub fn with_chunk_size(max_records_per_chunk: u64) -> Self {
        Self {
            max_records_per_chunk,
            ..Self::default()
        }
    }

    /// Override the global record cap
    pub fn max_total_records(mut self, max_total_records: u64) -> Self {
        self.max_total_records = max_total_records;
        self
    }

    /// Reject limits that could never produce a chunk
    pub fn validate(&self) -> Result<()> {
        if self.max_records_per_chunk == 0 {
            return Err(Error::config(
                "max_records_per_chunk",
                "max_records_per_chunk must be at least 1",
            ));
        }
        if self.max_total_records == 0 {
            return Err(Error::config(
                "max_total_records",
                "max_total_records must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Export request settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Base URL of the export API (e.g. "https://rest.example.com")
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Static bearer token sent with export requests
    #[serde(default)]
    pub api_token: Option<String>,

    /// Bucket the remote writes exports into, used when the response only
    /// carries an object prefix
    #[serde(default)]
    pub bucket: Option<String>,

    /// How long to wait after requesting an export before downloading it (default: 0 = no wait)
    #[serde(default, with = "duration_serde")]
    pub job_wait: Duration,

    /// Timeout for the export request itself (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_token: None,
            bucket: None,
            job_wait: Duration::ZERO,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Archive download settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Working directory; each run gets `<work_dir>/<run_id>/` (default: "./work")
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Timeout for a whole archive download (default: 600 seconds)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// S3-compatible endpoint used as the fallback when a direct fetch fails
    /// (e.g. "https://s3.us-east-1.amazonaws.com"); None disables the fallback
    #[serde(default)]
    pub object_store_endpoint: Option<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            request_timeout: default_download_timeout(),
            object_store_endpoint: None,
        }
    }
}

/// Stream processing settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Where chunk and summary files are written (default: "./results")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// File name prefix for chunk and summary files (default: "export")
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,

    /// Extensions of input files to read, case-insensitive, without the dot
    /// (default: txt, jsonl, json)
    #[serde(default = "default_input_extensions")]
    pub input_extensions: Vec<String>,

    /// Emit a progress event every this many records (default: 100,000; 0 disables)
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Record limits
    #[serde(default)]
    pub limits: ProcessingLimits,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            output_prefix: default_output_prefix(),
            input_extensions: default_input_extensions(),
            progress_interval: default_progress_interval(),
            limits: ProcessingLimits::default(),
        }
    }
}

/// Main configuration
///
/// Every field has a default, so `Config::default()` is usable for runs that
/// start from a download URL, an archive or a directory. Requesting an export
/// additionally needs `export.endpoint`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Export request settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Archive download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Stream processing settings
    #[serde(default)]
    pub processing: ProcessingConfig,
}

impl Config {
    /// Check settings that serde defaults cannot guard
    pub fn validate(&self) -> Result<()> {
        self.processing.limits.validate()?;

        if self.processing.input_extensions.is_empty() {
            return Err(Error::config(
                "input_extensions",
                "at least one input extension is required",
            ));
        }

        if self.processing.output_prefix.is_empty()
            || self
                .processing
                .output_prefix
                .contains(['/', '\\'])
        {
            return Err(Error::config(
                "output_prefix",
                "output_prefix must be a non-empty file name fragment",
            ));
        }

        if let Some(endpoint) = &self.export.endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                Error::config("export.endpoint", format!("invalid URL '{}': {}", endpoint, e))
            })?;
        }

        if let Some(endpoint) = &self.download.object_store_endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                Error::config(
                    "download.object_store_endpoint",
                    format!("invalid URL '{}': {}", endpoint, e),
                )
            })?;
        }

        Ok(())
    }
}

fn default_max_records() -> u64 {
    1_000_000
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./work")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./results")
}

fn default_output_prefix() -> String {
    "export".to_string()
}

fn default_input_extensions() -> Vec<String> {
    vec!["txt".to_string(), "jsonl".to_string(), "json".to_string()]
}

fn default_progress_interval() -> u64 {
    100_000
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
