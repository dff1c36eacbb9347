//! Export archive fixtures and record generators

use export_chunker::Config;
use std::path::Path;
use tempfile::TempDir;

/// One user record as the remote export writes it
pub fn user_line(id: u64) -> String {
    serde_json::json!({
        "external_id": format!("user-{id}"),
        "phone": format!("55{:08}", id),
        "custom_attributes": {"segment": "test", "rank": id}
    })
    .to_string()
}

/// NDJSON content for users `from..=to`, one per line
pub fn users_ndjson(from: u64, to: u64) -> String {
    let mut content = String::new();
    for id in from..=to {
        content.push_str(&user_line(id));
        content.push('\n');
    }
    content
}

/// Build a zip archive in memory holding the given files
pub fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            std::io::Write::write_all(&mut writer, content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// Write a zip archive to disk
pub fn write_zip(path: &Path, files: &[(&str, &str)]) {
    std::fs::write(path, zip_bytes(files)).unwrap();
}

/// Config rooted in a temp directory, pointing at a mock export endpoint
pub fn config_for(temp_dir: &TempDir, endpoint: Option<String>) -> Config {
    let mut config = Config::default();
    config.export.endpoint = endpoint;
    config.export.api_token = Some("test-token".to_string());
    config.export.bucket = Some("exports-bucket".to_string());
    config.download.work_dir = temp_dir.path().join("work");
    config.processing.output_dir = temp_dir.path().join("results");
    config
}
