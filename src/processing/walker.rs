//! Input enumeration and line reading

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Enumerates the input files of a directory
#[derive(Debug, Clone)]
pub struct FileSetWalker {
    extensions: Vec<String>,
}

impl FileSetWalker {
    /// Create a walker accepting the given extensions (case-insensitive, leading dot optional)
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        let extensions = extensions
            .iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { extensions }
    }

    /// Whether a file name has one of the accepted extensions
    pub fn accepts(&self, path: &Path) -> bool {
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            return false;
        }

        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.contains(&ext))
    }

    /// List matching files directly inside `dir`, sorted by path
    ///
    /// The order is stable for a fixed directory snapshot, so re-running a
    /// walk visits files in the same sequence.
    pub fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(Error::DirectoryNotFound {
                path: dir.to_path_buf(),
            });
        }

        let entries = std::fs::read_dir(dir).map_err(|source| Error::ProcessingFailed {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::ProcessingFailed {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();

            if path.is_file() && self.accepts(&path) {
                files.push(path);
            }
        }

        files.sort();
        debug!(?dir, count = files.len(), "found {} input file(s)", files.len());
        Ok(files)
    }
}

/// One line read from an input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLine {
    /// 1-based line number
    pub number: u64,
    /// Line text without its terminator, or the UTF-8 decode error message
    pub content: std::result::Result<String, String>,
}

/// A path plus a sequential cursor over its lines
///
/// Accepts `\n` and `\r\n` terminators; a final line without a terminator is
/// still yielded. Not restartable: open the file again to start over.
pub struct InputFile<R = BufReader<File>> {
    path: PathBuf,
    reader: R,
    line: u64,
    buf: Vec<u8>,
}

impl InputFile {
    /// Open a file for line reading
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(path, BufReader::new(file)))
    }
}

impl<R: BufRead> InputFile<R> {
    /// Wrap an existing reader; `path` is only used for reporting
    pub fn from_reader(path: &Path, reader: R) -> Self {
        Self {
            path: path.to_path_buf(),
            reader,
            line: 0,
            buf: Vec::with_capacity(4096),
        }
    }

    /// The file this cursor reads
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the next line; `Ok(None)` at end of file
    pub fn next_line(&mut self) -> std::io::Result<Option<InputLine>> {
        self.buf.clear();
        let read = self.reader.read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            return Ok(None);
        }
        self.line += 1;

        let mut bytes = self.buf.as_slice();
        if self.line == 1 {
            bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        }
        bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
        bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);

        let content = std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| format!("invalid UTF-8: {}", e));

        Ok(Some(InputLine {
            number: self.line,
            content,
        }))
    }
}

impl<R: BufRead> Iterator for InputFile<R> {
    type Item = std::io::Result<InputLine>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}
