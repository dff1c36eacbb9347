use super::*;
use crate::error::{DownloadError, ExportError};
use crate::export::ExportLocation;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const USERS: &str = "{\"id\":1}\n{\"id\":2}\nnot json\n{\"id\":3}\n";

enum ExportBehavior {
    Url(&'static str),
    Prefix(&'static str),
    InProgress,
}

struct MockExporter {
    behavior: ExportBehavior,
    calls: AtomicUsize,
}

impl MockExporter {
    fn new(behavior: ExportBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ExportRequester for MockExporter {
    async fn request_export(&self, _request: &ExportRequest) -> Result<crate::export::ExportLocation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ExportBehavior::Url(url) => Ok(ExportLocation {
                download_url: Some(url.to_string()),
                object_prefix: None,
            }),
            ExportBehavior::Prefix(prefix) => Ok(ExportLocation {
                download_url: None,
                object_prefix: Some(prefix.to_string()),
            }),
            ExportBehavior::InProgress => Err(ExportError::AlreadyInProgress {
                message: "export already in progress".to_string(),
            }
            .into()),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Writes a zip holding `USERS` as `users.txt`, or fails with access denied
struct MockDownloader {
    deny: bool,
    urls: Mutex<Vec<String>>,
}

impl MockDownloader {
    fn new(deny: bool) -> Arc<Self> {
        Arc::new(Self {
            deny,
            urls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        self.urls.lock().unwrap().push(url.to_string());
        if self.deny {
            return Err(DownloadError::AccessDenied {
                url: url.to_string(),
            }
            .into());
        }

        std::fs::create_dir_all(dest_dir)?;
        let archive = dest_dir.join("export.zip");
        write_zip(&archive, "users.txt", USERS);
        Ok(archive)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Zip extractor that counts invocations
struct CountingExtractor {
    calls: AtomicUsize,
}

impl CountingExtractor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ArchiveExtractor for CountingExtractor {
    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ZipExtractor::new().extract(archive, dest_dir).await
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

fn write_zip(path: &Path, name: &str, content: &str) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    writer.start_file(name, options).unwrap();
    std::io::Write::write_all(&mut writer, content.as_bytes()).unwrap();
    writer.finish().unwrap();
}

fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.work_dir = temp_dir.path().join("work");
    config.processing.output_dir = temp_dir.path().join("results");
    config.processing.limits = crate::config::ProcessingLimits::with_chunk_size(2);
    config.export.bucket = Some("exports-bucket".to_string());
    config
}

struct Harness {
    coordinator: PipelineCoordinator,
    exporter: Arc<MockExporter>,
    downloader: Arc<MockDownloader>,
    extractor: Arc<CountingExtractor>,
}

fn harness(config: Config, export: ExportBehavior, deny_download: bool) -> Harness {
    let exporter = MockExporter::new(export);
    let downloader = MockDownloader::new(deny_download);
    let extractor = CountingExtractor::new();
    let coordinator = PipelineCoordinator::with_collaborators(
        config,
        exporter.clone(),
        downloader.clone(),
        extractor.clone(),
    )
    .unwrap()
    .with_run_id(RunId::new("pipeline-test"));

    Harness {
        coordinator,
        exporter,
        downloader,
        extractor,
    }
}

fn export_input() -> PipelineInput {
    PipelineInput::Export(ExportRequest::new("seg-1", vec!["external_id".to_string()]))
}

fn read_records(summary: &RunSummary) -> Vec<Value> {
    summary
        .chunks
        .iter()
        .flat_map(|c| {
            let content = std::fs::read_to_string(&c.path).unwrap();
            serde_json::from_str::<Vec<Value>>(&content).unwrap()
        })
        .collect()
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_full_run_from_export_request() {
    let temp_dir = TempDir::new().unwrap();
    let h = harness(
        test_config(&temp_dir),
        ExportBehavior::Url("https://cdn.example.com/seg-1.zip"),
        false,
    );
    let mut rx = h.coordinator.subscribe();

    let summary = h.coordinator.run(export_input()).await.unwrap();

    assert_eq!(summary.total_records, 3);
    assert_eq!(summary.parse_errors, 1);
    assert_eq!(summary.chunks.len(), 2);
    assert_eq!(
        read_records(&summary),
        vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]
    );
    assert_eq!(h.exporter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *h.downloader.urls.lock().unwrap(),
        vec!["https://cdn.example.com/seg-1.zip".to_string()]
    );

    let run_dir = temp_dir.path().join("work").join("pipeline-test");
    assert!(run_dir.join("export.zip").is_file());
    assert!(run_dir.join("extracted").join("users.txt").is_file());

    let stages: Vec<(Stage, bool)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            Event::StageStarted { stage, .. } => Some((stage, false)),
            Event::StageComplete { stage, .. } => Some((stage, true)),
            _ => None,
        })
        .collect();
    assert_eq!(
        stages,
        vec![
            (Stage::Export, false),
            (Stage::Export, true),
            (Stage::Download, false),
            (Stage::Download, true),
            (Stage::Extract, false),
            (Stage::Extract, true),
            (Stage::Process, false),
            (Stage::Process, true),
        ]
    );
}

#[tokio::test]
async fn test_object_prefix_resolves_against_bucket() {
    let temp_dir = TempDir::new().unwrap();
    let h = harness(
        test_config(&temp_dir),
        ExportBehavior::Prefix("segment-export/seg-1"),
        false,
    );

    h.coordinator.run(export_input()).await.unwrap();

    assert_eq!(
        *h.downloader.urls.lock().unwrap(),
        vec!["s3://exports-bucket/segment-export/seg-1.zip".to_string()]
    );
}

#[tokio::test]
async fn test_export_in_progress_stops_before_download() {
    let temp_dir = TempDir::new().unwrap();
    let h = harness(test_config(&temp_dir), ExportBehavior::InProgress, false);
    let mut rx = h.coordinator.subscribe();

    let err = h.coordinator.run(export_input()).await.unwrap_err();

    assert!(matches!(err, Error::StageFailed { stage: Stage::Export, .. }));
    assert!(err.is_retry_later());
    assert!(h.downloader.urls.lock().unwrap().is_empty());
    assert!(!temp_dir.path().join("results").exists());

    let failed: Vec<Stage> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            Event::Failed { stage, .. } => Some(stage),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![Stage::Export]);
}

#[tokio::test]
async fn test_download_failure_is_reported_with_stage() {
    let temp_dir = TempDir::new().unwrap();
    let h = harness(
        test_config(&temp_dir),
        ExportBehavior::Url("https://cdn.example.com/seg-1.zip"),
        true,
    );

    let err = h
        .coordinator
        .run(PipelineInput::DownloadUrl("https://cdn.example.com/x.zip".into()))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Download));
    assert_eq!(err.error_code(), "download_access_denied");
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.exporter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resume_from_directory_skips_earlier_stages() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("already-extracted");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::write(input.join("users.txt"), USERS).unwrap();

    let h = harness(test_config(&temp_dir), ExportBehavior::InProgress, true);
    let summary = h
        .coordinator
        .run(PipelineInput::Directory(input))
        .await
        .unwrap();

    assert_eq!(summary.total_records, 3);
    assert_eq!(h.exporter.calls.load(Ordering::SeqCst), 0);
    assert!(h.downloader.urls.lock().unwrap().is_empty());
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resume_from_archive() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("kept.zip");
    write_zip(&archive, "users.jsonl", USERS);

    let h = harness(test_config(&temp_dir), ExportBehavior::InProgress, true);
    let summary = h
        .coordinator
        .run(PipelineInput::Archive(archive))
        .await
        .unwrap();

    assert_eq!(summary.total_records, 3);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
    assert!(h.downloader.urls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_job_wait_applies_only_after_export() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(&temp_dir);
    config.export.job_wait = Duration::from_millis(200);

    let h = harness(
        config,
        ExportBehavior::Url("https://cdn.example.com/seg-1.zip"),
        false,
    );
    let mut rx = h.coordinator.subscribe();
    let run = h.coordinator.begin();

    let started = Instant::now();
    let state = run.start(export_input()).await;
    let state = run.advance(state).await;
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(matches!(state, PipelineState::Downloaded { .. }));
    assert!(
        drain(&mut rx)
            .iter()
            .any(|e| matches!(e, Event::WaitingForJob { .. }))
    );

    // A known URL means the job is already done: no wait
    let state = run
        .start(PipelineInput::DownloadUrl("https://cdn.example.com/seg-1.zip".into()))
        .await;
    assert!(matches!(
        state,
        PipelineState::Requested {
            awaiting_job: false,
            ..
        }
    ));
    run.advance(state).await;
    assert!(
        !drain(&mut rx)
            .iter()
            .any(|e| matches!(e, Event::WaitingForJob { .. }))
    );
}

#[tokio::test]
async fn test_advance_performs_one_transition() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("kept.zip");
    write_zip(&archive, "users.txt", USERS);
    let h = harness(test_config(&temp_dir), ExportBehavior::InProgress, true);
    let run = h.coordinator.begin();

    let state = run.start(PipelineInput::Archive(archive)).await;
    assert_eq!(state.next_stage(), Some(Stage::Extract));

    let state = run.advance(state).await;
    let PipelineState::Extracted { directory } = &state else {
        panic!("expected Extracted, got {state:?}");
    };
    assert_eq!(directory, &run.run_dir().join("extracted"));
    assert!(!temp_dir.path().join("results").exists(), "processing has not run yet");

    let state = run.advance(state).await;
    assert!(state.is_terminal());
    assert!(matches!(state, PipelineState::Processed(_)));

    let state = run.advance(state).await;
    assert!(
        matches!(state, PipelineState::Processed(ref s) if s.total_records == 3),
        "terminal states are returned unchanged"
    );
}

#[tokio::test]
async fn test_processing_failure_is_process_stage() {
    let temp_dir = TempDir::new().unwrap();
    let h = harness(test_config(&temp_dir), ExportBehavior::InProgress, true);

    let err = h
        .coordinator
        .run(PipelineInput::Directory(temp_dir.path().join("missing")))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StageFailed { stage: Stage::Process, .. }));
    assert_eq!(err.error_code(), "directory_not_found");
}

#[tokio::test]
async fn test_export_without_endpoint_fails_in_export_stage() {
    let temp_dir = TempDir::new().unwrap();
    let coordinator = PipelineCoordinator::new(test_config(&temp_dir)).unwrap();

    let err = coordinator.run(export_input()).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Export));
    assert_eq!(err.error_code(), "config_error");
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = Config::default();
    config.processing.limits.max_records_per_chunk = 0;
    assert!(PipelineCoordinator::new(config).is_err());
}

#[test]
fn test_each_run_gets_its_own_id() {
    let temp_dir = TempDir::new().unwrap();
    let coordinator = PipelineCoordinator::new(test_config(&temp_dir)).unwrap();

    let a = coordinator.begin();
    let b = coordinator.begin();
    assert_ne!(a.run_id(), b.run_id());
    assert_ne!(a.run_dir(), b.run_dir());

    let pinned = coordinator.with_run_id(RunId::new("fixed"));
    assert_eq!(pinned.begin().run_id(), &RunId::new("fixed"));
    assert_eq!(pinned.begin().run_id(), &RunId::new("fixed"));
}

fn output_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn test_repeated_runs_keep_earlier_output() {
    let temp_dir = TempDir::new().unwrap();
    let first_input = temp_dir.path().join("first");
    let second_input = temp_dir.path().join("second");
    std::fs::create_dir_all(&first_input).unwrap();
    std::fs::create_dir_all(&second_input).unwrap();
    std::fs::write(
        first_input.join("users.txt"),
        "{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n{\"id\":4}\n{\"id\":5}\n",
    )
    .unwrap();
    std::fs::write(second_input.join("users.txt"), "{\"id\":9}\n").unwrap();

    let coordinator = PipelineCoordinator::new(test_config(&temp_dir)).unwrap();
    let results = temp_dir.path().join("results");

    let first = coordinator
        .run(PipelineInput::Directory(first_input))
        .await
        .unwrap();
    let first_files = output_files(&results);
    assert_eq!(first.chunks.len(), 3);
    assert_eq!(first_files.len(), 4, "three chunks and a summary");

    let second = coordinator
        .run(PipelineInput::Directory(second_input))
        .await
        .unwrap();

    assert_ne!(first.run_id, second.run_id);
    let all_files = output_files(&results);
    assert_eq!(all_files.len(), 6, "second run adds one chunk and a summary");
    for file in &first_files {
        assert!(all_files.contains(file));
    }
    assert_eq!(
        read_records(&first),
        (1..=5).map(|i| json!({"id": i})).collect::<Vec<_>>()
    );
    assert_eq!(read_records(&second), vec![json!({"id": 9})]);
}

#[tokio::test]
async fn test_pinned_run_id_extracts_into_a_clean_directory() {
    let temp_dir = TempDir::new().unwrap();
    let old_archive = temp_dir.path().join("old.zip");
    let new_archive = temp_dir.path().join("new.zip");
    write_zip(&old_archive, "old.txt", "{\"id\":100}\n");
    write_zip(&new_archive, "users.txt", USERS);

    let h = harness(test_config(&temp_dir), ExportBehavior::InProgress, true);
    h.coordinator
        .run(PipelineInput::Archive(old_archive))
        .await
        .unwrap();
    let summary = h
        .coordinator
        .run(PipelineInput::Archive(new_archive))
        .await
        .unwrap();

    let extracted = temp_dir.path().join("work/pipeline-test/extracted");
    assert!(!extracted.join("old.txt").exists());
    assert!(extracted.join("users.txt").is_file());
    assert_eq!(summary.files_scanned, 1);
    assert_eq!(
        read_records(&summary),
        vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]
    );
}
