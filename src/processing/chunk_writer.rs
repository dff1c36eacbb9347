//! Incremental JSON-array chunk files
//!
//! A chunk is built on disk one record at a time under a hidden `.partial`
//! name in the destination directory and renamed to its final name by
//! [`ChunkWriter::close`]. A writer dropped without `close` (fatal abort)
//! removes its partial file, so a file at a final chunk path is always a
//! complete JSON document.

use crate::types::ChunkInfo;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Indentation of array elements inside a chunk file
const ELEMENT_INDENT: &[u8] = b"  ";

/// Owns one open chunk file between `open` and `close`
pub struct ChunkWriter {
    index: u32,
    final_path: PathBuf,
    partial_path: PathBuf,
    writer: Option<BufWriter<File>>,
    records: u64,
    scratch: Vec<u8>,
}

impl ChunkWriter {
    /// Create the chunk file and write the opening bracket
    pub fn open(final_path: &Path, index: u32) -> std::io::Result<Self> {
        let partial_path = partial_path_for(final_path)?;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&partial_path)?;

        // Open the array
        let mut writer = BufWriter::new(file);
        writer.write_all(b"[")?;

        debug!(?final_path, index, "opened chunk");

        Ok(Self {
            index,
            final_path: final_path.to_path_buf(),
            partial_path,
            writer: Some(writer),
            records: 0,
            scratch: Vec::with_capacity(1024),
        })
    }

    /// Write one record immediately, preceded by a separator unless it is the first
    pub fn append(&mut self, record: &Value) -> std::io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("chunk writer already closed"))?;

        // Serialize into scratch first
        self.scratch.clear();
        serde_json::to_writer_pretty(&mut self.scratch, record)?;

        // Separator, then the record indented one level
        writer.write_all(if self.records == 0 { b"\n" } else { b",\n" })?;
        for (i, line) in self.scratch.split(|&b| b == b'\n').enumerate() {
            if i > 0 {
                writer.write_all(b"\n")?;
            }
            writer.write_all(ELEMENT_INDENT)?;
            writer.write_all(line)?;
        }

        self.records += 1;
        Ok(())
    }

    /// Records appended so far
    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// 1-based index of this chunk
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Path the chunk will have once closed
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Write the closing bracket, flush, and move the file to its final path
    pub fn close(mut self) -> std::io::Result<ChunkInfo> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| std::io::Error::other("chunk writer already closed"))?;

        if let Err(e) = self.finish(writer) {
            let _ = std::fs::remove_file(&self.partial_path);
            return Err(e);
        }

        debug!(
            path = ?self.final_path,
            index = self.index,
            records = self.records,
            "closed chunk"
        );

        Ok(ChunkInfo {
            index: self.index,
            path: self.final_path.clone(),
            record_count: self.records,
        })
    }

    fn finish(&self, mut writer: BufWriter<File>) -> std::io::Result<()> {
        if self.records == 0 {
            writer.write_all(b"]\n")?;
        } else {
            writer.write_all(b"\n]\n")?;
        }

        // Flush and sync before the rename makes the chunk visible
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&self.partial_path, &self.final_path)
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        // Only reached with a live writer when close() was never called
        if self.writer.take().is_some()
            && let Err(e) = std::fs::remove_file(&self.partial_path)
        {
            warn!(
                path = ?self.partial_path,
                error = %e,
                "failed to remove partial chunk file"
            );
        }
    }
}

fn partial_path_for(final_path: &Path) -> std::io::Result<PathBuf> {
    let name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("chunk path has no file name: {}", final_path.display()),
            )
        })?;
    Ok(final_path.with_file_name(format!(".{}.partial", name)))
}
