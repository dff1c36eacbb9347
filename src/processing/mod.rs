//! Streaming record-chunking processor
//!
//! Turns a directory of newline-delimited JSON files into a sequence of
//! JSON-array chunk files plus a run summary:
//! 1. Walk - list input files in a stable order
//! 2. Parse - decode each non-blank line, skipping malformed ones
//! 3. Write - append records to the open chunk, rolling over at the per-chunk limit
//! 4. Stop - at end of input or as soon as the global record cap is reached
//! 5. Summarize - close the last chunk and persist the summary
//!
//! Records are streamed: memory use is bounded by one line plus one I/O
//! buffer, regardless of input size.

use crate::config::{ProcessingConfig, ProcessingLimits};
use crate::error::{Error, Result};
use crate::types::{ChunkInfo, Event, RunId, RunSummary};
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

mod chunk_writer;
mod parser;
mod walker;

pub use chunk_writer::ChunkWriter;
pub use parser::{ParseError, parse_line};
pub use walker::{FileSetWalker, InputFile, InputLine};

/// Mutable state of one invocation
struct RunState {
    limits: ProcessingLimits,
    current: Option<ChunkWriter>,
    chunks: Vec<ChunkInfo>,
    total_records: u64,
    files_scanned: u64,
    parse_errors: u64,
    cap_reached: bool,
}

impl RunState {
    fn new(limits: ProcessingLimits) -> Self {
        Self {
            limits,
            current: None,
            chunks: Vec::new(),
            total_records: 0,
            files_scanned: 0,
            parse_errors: 0,
            cap_reached: false,
        }
    }
}

/// Stream processor for one run
///
/// Each call to [`process_directory`](Self::process_directory) is one
/// invocation with its own chunks and summary. Calls sharing a `RunId` write
/// to the same file names, so give each invocation its own run id.
#[derive(Clone)]
pub struct StreamProcessor {
    config: ProcessingConfig,
    run_id: RunId,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl StreamProcessor {
    /// Create a processor writing into `config.output_dir` under `run_id`
    pub fn new(config: ProcessingConfig, run_id: RunId) -> Self {
        Self {
            config,
            run_id,
            event_tx: None,
        }
    }

    /// Publish progress events on the given channel
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Run this processor writes under
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Final path of the chunk with the given 1-based index
    pub fn chunk_path(&self, index: u32) -> PathBuf {
        self.config.output_dir.join(format!(
            "{}_{}_chunk_{}.json",
            self.config.output_prefix, self.run_id, index
        ))
    }

    /// Path of the run summary file
    pub fn summary_path(&self) -> PathBuf {
        self.config.output_dir.join(format!(
            "{}_{}_summary.json",
            self.config.output_prefix, self.run_id
        ))
    }

    /// Process a directory on the blocking thread pool
    pub async fn process_directory(
        &self,
        input_dir: &Path,
        limits: ProcessingLimits,
    ) -> Result<RunSummary> {
        let processor = self.clone();
        let input_dir = input_dir.to_path_buf();

        tokio::task::spawn_blocking(move || {
            processor.process_directory_blocking(&input_dir, limits)
        })
        .await
        .map_err(|e| Error::Other(format!("processing task failed: {}", e)))?
    }

    /// Process a directory on the current thread
    ///
    /// Malformed lines are logged and skipped. Any read or write failure
    /// aborts the run with [`Error::ProcessingFailed`]; the chunk being
    /// written at that moment is discarded and no summary is written.
    pub fn process_directory_blocking(
        &self,
        input_dir: &Path,
        limits: ProcessingLimits,
    ) -> Result<RunSummary> {
        limits.validate()?;
        let started_at = Utc::now();

        let walker = FileSetWalker::new(self.config.input_extensions.as_slice());
        let files = walker.list_files(input_dir)?;

        info!(
            run_id = %self.run_id,
            ?input_dir,
            file_count = files.len(),
            max_total_records = limits.max_total_records,
            max_records_per_chunk = limits.max_records_per_chunk,
            "starting stream processing"
        );
        self.emit(Event::ProcessingStarted {
            run_id: self.run_id.clone(),
            files: files.len(),
        });

        // Create output directory if it doesn't exist
        std::fs::create_dir_all(&self.config.output_dir).map_err(|source| {
            Error::ProcessingFailed {
                path: self.config.output_dir.clone(),
                source,
            }
        })?;

        // Read files in order until input ends or the cap is hit
        let mut run = RunState::new(limits);
        for (i, path) in files.iter().enumerate() {
            if run.cap_reached {
                break;
            }
            self.process_file(path, i + 1, files.len(), &mut run)?;
        }
        self.close_current(&mut run)?;

        if run.cap_reached {
            info!(
                run_id = %self.run_id,
                total_records = run.total_records,
                "record cap reached, stopped reading input"
            );
        }

        let mut summary = RunSummary {
            run_id: self.run_id.clone(),
            total_records: run.total_records,
            files_scanned: run.files_scanned,
            chunks_written: run.chunks.len() as u64,
            parse_errors: run.parse_errors,
            cap_reached: run.cap_reached,
            chunks: run.chunks,
            started_at,
            finished_at: Utc::now(),
            summary_path: None,
        };
        self.persist_summary(&mut summary)?;

        info!(
            run_id = %self.run_id,
            total_records = summary.total_records,
            chunks_written = summary.chunks_written,
            files_scanned = summary.files_scanned,
            parse_errors = summary.parse_errors,
            "stream processing complete"
        );
        self.emit(Event::ProcessingComplete {
            run_id: self.run_id.clone(),
            total_records: summary.total_records,
            chunks_written: summary.chunks_written,
            cap_reached: summary.cap_reached,
        });

        Ok(summary)
    }

    /// Consume one input file, stopping early if the cap is reached
    fn process_file(
        &self,
        path: &Path,
        index: usize,
        total: usize,
        run: &mut RunState,
    ) -> Result<()> {
        run.files_scanned += 1;
        debug!(run_id = %self.run_id, ?path, index, total, "reading input file");
        self.emit(Event::FileStarted {
            run_id: self.run_id.clone(),
            path: path.to_path_buf(),
            index,
            total,
        });

        let read_failed = |source| Error::ProcessingFailed {
            path: path.to_path_buf(),
            source,
        };
        let mut input = InputFile::open(path).map_err(read_failed)?;

        let mut file_records = 0u64;
        let mut file_errors = 0u64;

        while let Some(line) = input.next_line().map_err(read_failed)? {
            let parsed = match line.content {
                Ok(text) => parse_line(path, line.number, &text),
                Err(message) => Some(Err(ParseError::new(path, line.number, message, ""))),
            };

            match parsed {
                None => continue,
                Some(Err(e)) => {
                    file_errors += 1;
                    run.parse_errors += 1;
                    self.reject(&e);
                }
                Some(Ok(record)) => {
                    self.append(&record, run)?;
                    file_records += 1;

                    if run.total_records >= run.limits.max_total_records {
                        run.cap_reached = true;
                        break;
                    }
                }
            }
        }

        debug!(
            run_id = %self.run_id,
            ?path,
            records = file_records,
            parse_errors = file_errors,
            "finished input file"
        );
        self.emit(Event::FileFinished {
            run_id: self.run_id.clone(),
            path: path.to_path_buf(),
            records: file_records,
            parse_errors: file_errors,
        });

        Ok(())
    }

    /// Append one record, rolling over first if the open chunk is full
    fn append(&self, record: &Value, run: &mut RunState) -> Result<()> {
        let full = run
            .current
            .as_ref()
            .is_some_and(|chunk| chunk.record_count() >= run.limits.max_records_per_chunk);
        if full {
            self.close_current(run)?;
        }

        // Open the next chunk lazily
        if run.current.is_none() {
            let index = run.chunks.len() as u32 + 1;
            let path = self.chunk_path(index);
            let writer = ChunkWriter::open(&path, index)
                .map_err(|source| Error::ProcessingFailed { path, source })?;
            run.current = Some(writer);
        }

        let Some(writer) = run.current.as_mut() else {
            return Err(Error::Other("no open chunk to append to".to_string()));
        };
        writer
            .append(record)
            .map_err(|source| Error::ProcessingFailed {
                path: writer.final_path().to_path_buf(),
                source,
            })?;
        run.total_records += 1;

        let interval = self.config.progress_interval;
        if interval > 0 && run.total_records % interval == 0 {
            info!(
                run_id = %self.run_id,
                total_records = run.total_records,
                "processed {} records",
                run.total_records
            );
            self.emit(Event::Progress {
                run_id: self.run_id.clone(),
                total_records: run.total_records,
            });
        }

        Ok(())
    }

    /// Close the open chunk, if any, and record it
    fn close_current(&self, run: &mut RunState) -> Result<()> {
        let Some(writer) = run.current.take() else {
            return Ok(());
        };

        // Dropping an unused writer removes its partial file
        if writer.record_count() == 0 {
            return Ok(());
        }

        let path = writer.final_path().to_path_buf();
        let chunk = writer
            .close()
            .map_err(|source| Error::ProcessingFailed { path, source })?;

        info!(
            run_id = %self.run_id,
            index = chunk.index,
            records = chunk.record_count,
            path = ?chunk.path,
            "chunk written"
        );
        self.emit(Event::ChunkWritten {
            run_id: self.run_id.clone(),
            chunk: chunk.clone(),
        });

        run.chunks.push(chunk);
        Ok(())
    }

    fn reject(&self, error: &ParseError) {
        warn!(
            run_id = %self.run_id,
            file = ?error.file,
            line = error.line,
            error = %error.message,
            snippet = %error.snippet,
            "skipping malformed record"
        );
        self.emit(Event::RecordRejected {
            run_id: self.run_id.clone(),
            file: error.file.clone(),
            line: error.line,
            error: error.message.clone(),
        });
    }

    fn persist_summary(&self, summary: &mut RunSummary) -> Result<()> {
        let path = self.summary_path();
        summary.summary_path = Some(path.clone());

        let json = serde_json::to_vec_pretty(summary)?;
        std::fs::write(&path, json).map_err(|source| Error::ProcessingFailed {
            path: path.clone(),
            source,
        })?;

        debug!(run_id = %self.run_id, ?path, "summary written");
        Ok(())
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }
}

/// Process `input_dir` with the default processing configuration under a fresh run id
///
/// Convenience entry point; use [`StreamProcessor`] to choose the output
/// directory, naming, or to receive events.
pub async fn process_directory(input_dir: &Path, limits: ProcessingLimits) -> Result<RunSummary> {
    StreamProcessor::new(ProcessingConfig::default(), RunId::generate())
        .process_directory(input_dir, limits)
        .await
}
