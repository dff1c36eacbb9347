//! Archive extraction
//!
//! Export archives are standard zip files. Extraction runs on the blocking
//! thread pool and writes every entry under the destination directory.

mod zip;


pub use zip::ZipExtractor;

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Trait for unpacking a downloaded archive
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `archive` into `dest_dir`, returning the directory holding the extracted files
    ///
    /// Failures are reported as [`Error::ExtractFailed`](crate::Error::ExtractFailed).
    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<PathBuf>;

    /// Name of this implementation, for logs
    fn name(&self) -> &'static str;
}
