//! Line decoding: one NDJSON line into one record

use serde_json::Value;
use std::path::{Path, PathBuf};

/// Number of characters of an offending line kept for log context
const SNIPPET_CHARS: usize = 100;

/// A line that could not be decoded
///
/// Recoverable: the run logs it, counts it, and moves on to the next line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// File the line came from
    pub file: PathBuf,
    /// 1-based line number
    pub line: u64,
    /// Decoder message
    pub message: String,
    /// Leading part of the offending line
    pub snippet: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}: {} (line starts with: {})",
            self.file.display(),
            self.line,
            self.message,
            self.snippet
        )
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    pub(crate) fn new(file: &Path, line: u64, message: impl Into<String>, raw: &str) -> Self {
        Self {
            file: file.to_path_buf(),
            line,
            message: message.into(),
            snippet: raw.chars().take(SNIPPET_CHARS).collect(),
        }
    }
}

/// Decode one line into a record
///
/// Returns `None` for blank or whitespace-only lines, which are neither
/// records nor errors.
pub fn parse_line(file: &Path, line: u64, text: &str) -> Option<Result<Value, ParseError>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(
        serde_json::from_str::<Value>(trimmed)
            .map_err(|e| ParseError::new(file, line, e.to_string(), trimmed)),
    )
}
