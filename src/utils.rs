//! Helpers shared by the HTTP collaborators

use crate::error::{Error, Result};
use std::time::Duration;

/// File name used when neither the response nor the URL names the archive
pub const DEFAULT_ARCHIVE_NAME: &str = "export.zip";

/// Build an HTTP client with a whole-request timeout
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Other(format!("failed to create HTTP client: {}", e)))
}

/// Pick a local file name for a downloaded archive
///
/// Tries the `Content-Disposition` header (`filename=` and the RFC 5987
/// `filename*=` form), then the last segment of the URL path, then
/// [`DEFAULT_ARCHIVE_NAME`]. The extension is kept; directory components are
/// stripped so the name can never escape the destination directory.
///
/// # Examples
///
/// ```ignore
/// let response = reqwest::get("https://bucket.s3.amazonaws.com/exports/users.zip").await?;
/// let name = filename_from_response(&response, "https://bucket.s3.amazonaws.com/exports/users.zip");
/// // Returns "users.zip"
/// ```
pub fn filename_from_response(response: &reqwest::Response, url: &str) -> String {
    let disposition = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok());

    disposition
        .and_then(filename_from_disposition)
        .or_else(|| filename_from_url(url))
        .unwrap_or_else(|| DEFAULT_ARCHIVE_NAME.to_string())
}

/// Parse the file name out of a `Content-Disposition` header value
///
/// Format: `attachment; filename="file.zip"` or `filename*=UTF-8''file%20name.zip`
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let mut plain = None;

    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // charset'lang'encoded-filename; the extended form wins
            if let Some(idx) = encoded.rfind('\'')
                && let Ok(decoded) = urlencoding::decode(&encoded[idx + 1..])
                && let Some(name) = safe_file_name(&decoded)
            {
                return Some(name);
            }
        } else if let Some(name) = part.strip_prefix("filename=") {
            plain = safe_file_name(name.trim_matches('"'));
        }
    }

    plain
}

/// Last non-empty path segment of a URL, percent-decoded
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(last).ok()?;
    safe_file_name(&decoded)
}

fn safe_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}
