//! # export-chunker
//!
//! Turns a remote bulk export into size-bounded JSON result files.
//!
//! ## Overview
//!
//! A run goes through four stages:
//! - **Export** - ask the remote API to export a segment
//! - **Download** - fetch the export archive (HTTP, with an object-store fallback)
//! - **Extract** - unpack the zip archive
//! - **Process** - stream the newline-delimited JSON records into chunk files
//!
//! The processing stage is the heart of the crate: records are read one line
//! at a time and appended to the current chunk file on disk, so memory use
//! does not grow with the size of the export. Malformed lines are logged and
//! skipped; a global record cap stops a run early.
//!
//! ## Quick Start
//!
//! ```no_run
//! use export_chunker::{Config, PipelineCoordinator, PipelineInput};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.processing.limits.max_records_per_chunk = 500_000;
//!
//!     let coordinator = PipelineCoordinator::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = coordinator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     // Resume from an archive that was downloaded earlier
//!     let summary = coordinator
//!         .run(PipelineInput::Archive(PathBuf::from("./work/export.zip")))
//!         .await?;
//!     println!("{} records in {} chunks", summary.total_records, summary.chunks_written);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Archive download with object-store fallback
pub mod download;
/// Error types
pub mod error;
/// Bulk export requests
pub mod export;
/// Archive extraction
pub mod extraction;
/// Stage sequencing and resumption
pub mod pipeline;
/// Streaming record chunking
pub mod processing;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, ExportConfig, ProcessingConfig, ProcessingLimits};
pub use download::{Downloader, HttpDownloader, HttpObjectStore, ObjectLocation, ObjectStore};
pub use error::{DownloadError, Error, ExportError, Result};
pub use export::{ExportLocation, ExportRequest, ExportRequester, HttpExportRequester};
pub use extraction::{ArchiveExtractor, ZipExtractor};
pub use pipeline::{PipelineCoordinator, PipelineInput, PipelineRun, PipelineState};
pub use processing::{ParseError, StreamProcessor, process_directory};
pub use types::{ChunkInfo, Event, RunId, RunSummary, Stage};
