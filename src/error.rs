//! Error types for export-chunker
//!
//! This module provides the error handling for the library:
//! - Stage-fatal errors raised by the stream processor (missing directory, disk I/O)
//! - Upstream-fatal errors raised by the external collaborators (export, download, extract)
//! - A pipeline wrapper that records which stage failed
//! - Machine-readable error codes for callers deciding on manual remediation
//!
//! Per-line parse failures are not errors at this level; see
//! [`ParseError`](crate::processing::ParseError).

use crate::types::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for export-chunker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for export-chunker
///
/// Each variant carries enough context (stage, path, cause) for a caller to
/// decide how to resume, e.g. re-supplying a download URL and resuming from
/// extraction.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_records_per_chunk")
        key: Option<String>,
    },

    /// Input directory is missing or is not a directory
    #[error("input directory not found: {}", path.display())]
    DirectoryNotFound {
        /// The path that was expected to be a directory
        path: PathBuf,
    },

    /// Reading input or writing output failed; the run was aborted
    #[error("processing failed at {}: {source}", path.display())]
    ProcessingFailed {
        /// The file or directory being read or written when the failure occurred
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The export request was rejected or could not be made
    #[error("export request failed: {0}")]
    ExportRequestFailed(#[from] ExportError),

    /// The archive could not be downloaded
    #[error("download failed: {0}")]
    DownloadFailed(#[from] DownloadError),

    /// The archive could not be extracted
    #[error("extraction failed for {}: {reason}", archive.display())]
    ExtractFailed {
        /// The archive that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// A pipeline stage failed; wraps the stage's own error
    #[error("{stage} stage failed: {source}")]
    StageFailed {
        /// The stage where the failure occurred
        stage: Stage,
        /// The stage's error
        #[source]
        source: Box<Error>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Export request errors
#[derive(Debug, Error)]
pub enum ExportError {
    /// An export for this segment is already running on the remote side.
    ///
    /// This is the retry-later condition: nothing is wrong with the request,
    /// the caller should wait for the running job and resume from its URL.
    #[error("an export is already in progress: {message}")]
    AlreadyInProgress {
        /// Message returned by the remote API
        message: String,
    },

    /// The remote API rejected the request
    #[error("export rejected with HTTP {status}: {message}")]
    Rejected {
        /// HTTP status code returned by the remote API
        status: u16,
        /// Message returned by the remote API
        message: String,
    },

    /// The request could not be sent or the response could not be read
    #[error("export request transport error: {0}")]
    Transport(String),

    /// The remote API accepted the request but returned nothing to download from
    #[error("export response has neither a download URL nor a resolvable object prefix")]
    MissingLocation,
}

/// Download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The remote refused access to the object (HTTP 401/403 or object-store denial)
    #[error("access denied for {url}")]
    AccessDenied {
        /// The URL (or object location) that was refused
        url: String,
    },

    /// The remote answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL being fetched
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The URL could not be parsed or has an unsupported scheme
    #[error("invalid download URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Connection, timeout, or body read failure
    #[error("transfer of {url} failed: {reason}")]
    Transfer {
        /// The URL being fetched
        url: String,
        /// The underlying cause
        reason: String,
    },

    /// The archive could not be written to local disk
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// Local destination path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Shorthand for a configuration error on a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::DirectoryNotFound { .. } => "directory_not_found",
            Error::ProcessingFailed { .. } => "processing_failed",
            Error::ExportRequestFailed(e) => match e {
                ExportError::AlreadyInProgress { .. } => "export_already_in_progress",
                ExportError::Rejected { .. } => "export_rejected",
                ExportError::Transport(_) => "export_transport_error",
                ExportError::MissingLocation => "export_missing_location",
            },
            Error::DownloadFailed(e) => match e {
                DownloadError::AccessDenied { .. } => "download_access_denied",
                DownloadError::HttpStatus { .. } => "download_http_error",
                DownloadError::InvalidUrl { .. } => "download_invalid_url",
                DownloadError::Transfer { .. } => "download_transfer_error",
                DownloadError::Write { .. } => "download_write_error",
            },
            Error::ExtractFailed { .. } => "extract_failed",
            Error::StageFailed { source, .. } => source.error_code(),
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }

    /// The pipeline stage this error was raised in, if known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::StageFailed { stage, .. } => Some(*stage),
            Error::ExportRequestFailed(_) => Some(Stage::Export),
            Error::DownloadFailed(_) => Some(Stage::Download),
            Error::ExtractFailed { .. } => Some(Stage::Extract),
            Error::DirectoryNotFound { .. } | Error::ProcessingFailed { .. } => {
                Some(Stage::Process)
            }
            _ => None,
        }
    }

    /// Whether the caller should simply try again later (remote job already running)
    pub fn is_retry_later(&self) -> bool {
        match self {
            Error::ExportRequestFailed(ExportError::AlreadyInProgress { .. }) => true,
            Error::StageFailed { source, .. } => source.is_retry_later(),
            _ => false,
        }
    }
}
