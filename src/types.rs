//! Core types for export-chunker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for one run of the pipeline
///
/// Generated once per invocation and threaded through every stage. All files
/// a run produces are named after it, so concurrent runs never collide.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Create a RunId from a caller-supplied value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh RunId: local timestamp plus a random suffix
    ///
    /// Format: `2024-05-01_13-45-09_9f3a01bc`
    pub fn generate() -> Self {
        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let suffix: u32 = rand::random();
        Self(format!("{}_{:08x}", timestamp, suffix))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipeline stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Export request against the remote API
    Export,
    /// Archive download
    Download,
    /// Archive extraction
    Extract,
    /// Streaming record processing
    Process,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Export => "export",
            Stage::Download => "download",
            Stage::Extract => "extract",
            Stage::Process => "process",
        };
        f.write_str(name)
    }
}

/// One closed chunk file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// 1-based chunk index within the run
    pub index: u32,
    /// Final path of the chunk file
    pub path: PathBuf,
    /// Number of records in the chunk
    pub record_count: u64,
}

/// Summary of one processing invocation
///
/// Persisted next to the chunk files as `<prefix>_<run_id>_summary.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run this summary belongs to
    pub run_id: RunId,
    /// Records written across all chunks
    pub total_records: u64,
    /// Input files opened (files never reached because of the cap are not counted)
    pub files_scanned: u64,
    /// Number of chunk files written
    pub chunks_written: u64,
    /// Malformed lines that were skipped
    pub parse_errors: u64,
    /// Whether processing stopped because the global record cap was hit
    pub cap_reached: bool,
    /// Closed chunks in index order
    pub chunks: Vec<ChunkInfo>,
    /// When processing started
    pub started_at: DateTime<Utc>,
    /// When processing finished
    pub finished_at: DateTime<Utc>,
    /// Where this summary was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<PathBuf>,
}

/// Event emitted during a run
///
/// Events are published on a `tokio::sync::broadcast` channel. Sending never
/// blocks and a run does not care whether anyone is listening.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A pipeline stage started
    StageStarted {
        /// Run ID
        run_id: RunId,
        /// Stage that started
        stage: Stage,
    },

    /// A pipeline stage completed
    StageComplete {
        /// Run ID
        run_id: RunId,
        /// Stage that completed
        stage: Stage,
    },

    /// Waiting for the remote export job before downloading
    WaitingForJob {
        /// Run ID
        run_id: RunId,
        /// Wait duration in seconds
        seconds: u64,
    },

    /// Stream processing started
    ProcessingStarted {
        /// Run ID
        run_id: RunId,
        /// Number of input files found
        files: usize,
    },

    /// Started reading an input file
    FileStarted {
        /// Run ID
        run_id: RunId,
        /// Input file path
        path: PathBuf,
        /// 1-based position of this file in the walk
        index: usize,
        /// Number of files in the walk
        total: usize,
    },

    /// Finished reading an input file (or stopped inside it because of the cap)
    FileFinished {
        /// Run ID
        run_id: RunId,
        /// Input file path
        path: PathBuf,
        /// Records accepted from this file
        records: u64,
        /// Malformed lines skipped in this file
        parse_errors: u64,
    },

    /// Periodic progress update
    Progress {
        /// Run ID
        run_id: RunId,
        /// Records written so far
        total_records: u64,
    },

    /// A malformed line was skipped
    RecordRejected {
        /// Run ID
        run_id: RunId,
        /// File the line came from
        file: PathBuf,
        /// 1-based line number
        line: u64,
        /// Decode error message
        error: String,
    },

    /// A chunk file was closed and is now valid
    ChunkWritten {
        /// Run ID
        run_id: RunId,
        /// Chunk details
        chunk: ChunkInfo,
    },

    /// Stream processing finished
    ProcessingComplete {
        /// Run ID
        run_id: RunId,
        /// Records written
        total_records: u64,
        /// Chunk files written
        chunks_written: u64,
        /// Whether the global cap stopped processing
        cap_reached: bool,
    },

    /// The run failed at some stage
    Failed {
        /// Run ID
        run_id: RunId,
        /// Stage where the failure occurred
        stage: Stage,
        /// Error message
        error: String,
    },
}
