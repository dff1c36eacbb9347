use super::ArchiveExtractor;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Archive extractor for ZIP files
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipExtractor;

impl ZipExtractor {
    /// Create a zip extractor
    pub fn new() -> Self {
        Self
    }

    fn failed(archive_path: &Path, reason: impl Into<String>) -> Error {
        Error::ExtractFailed {
            archive: archive_path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Extract a single ZIP entry to disk, creating directories as needed
    ///
    /// Entries whose names would land outside `dest_path` are skipped.
    fn extract_zip_entry(
        mut file: ::zip::read::ZipFile,
        dest_path: &Path,
        archive_path: &Path,
    ) -> Result<Option<PathBuf>> {
        // Resolve the entry path inside the destination
        let file_path = match file.enclosed_name() {
            Some(path) => dest_path.join(path),
            None => {
                warn!(
                    ?archive_path,
                    entry = file.name(),
                    "skipping entry with unsafe path"
                );
                return Ok(None);
            }
        };

        // Directories only need creating
        if file.is_dir() {
            std::fs::create_dir_all(&file_path).map_err(|e| {
                Self::failed(archive_path, format!("failed to create directory: {}", e))
            })?;
            return Ok(None);
        }

        // Create parent directories if needed
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Self::failed(
                    archive_path,
                    format!("failed to create parent directories: {}", e),
                )
            })?;
        }

        // Extract file
        let mut outfile = std::fs::File::create(&file_path).map_err(|e| {
            Self::failed(archive_path, format!("failed to create output file: {}", e))
        })?;

        std::io::copy(&mut file, &mut outfile).map_err(|e| {
            Self::failed(
                archive_path,
                format!("failed to extract {}: {}", file_path.display(), e),
            )
        })?;

        Ok(Some(file_path))
    }

    /// Extract every entry of a ZIP archive on the current thread
    ///
    /// Returns the extracted file paths in archive order.
    pub fn extract_blocking(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting ZIP extraction");

        // Create destination directory if it doesn't exist
        std::fs::create_dir_all(dest_path).map_err(|e| {
            Self::failed(archive_path, format!("failed to create destination: {}", e))
        })?;

        // Open the archive
        let file = std::fs::File::open(archive_path).map_err(|e| {
            Self::failed(archive_path, format!("failed to open ZIP archive: {}", e))
        })?;

        let mut archive = ::zip::ZipArchive::new(file).map_err(|e| {
            Self::failed(archive_path, format!("failed to read ZIP archive: {}", e))
        })?;

        // Extract each entry
        let mut extracted_files = Vec::new();
        for i in 0..archive.len() {
            let file = archive.by_index(i).map_err(|e| {
                Self::failed(archive_path, format!("failed to read ZIP entry {}: {}", i, e))
            })?;

            if let Some(file_path) = Self::extract_zip_entry(file, dest_path, archive_path)? {
                extracted_files.push(file_path);
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "ZIP extraction successful"
        );

        Ok(extracted_files)
    }
}

#[async_trait]
impl ArchiveExtractor for ZipExtractor {
    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<PathBuf> {
        let archive_path = archive.to_path_buf();
        let dest_path = dest_dir.to_path_buf();

        tokio::task::spawn_blocking(move || Self::extract_blocking(&archive_path, &dest_path))
            .await
            .map_err(|e| Self::failed(archive, format!("extraction task failed: {}", e)))??;

        Ok(dest_dir.to_path_buf())
    }

    fn name(&self) -> &'static str {
        "zip"
    }
}
