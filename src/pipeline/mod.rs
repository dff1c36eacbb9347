//! End-to-end export pipeline
//!
//! This module sequences the stages of one run:
//! 1. Export - ask the remote API for a bulk export (optional)
//! 2. Wait - give the remote job time to finish (only after an export request)
//! 3. Download - fetch the export archive into `<work_dir>/<run_id>/`
//! 4. Extract - unpack it into `<work_dir>/<run_id>/extracted/`
//! 5. Process - stream the extracted records into chunk files
//!
//! The sequence is a linear state machine: [`PipelineRun::advance`]
//! performs one transition at a time, and a run may enter at any
//! intermediate artifact (a download URL, an archive, a directory) without
//! repeating earlier stages.

use crate::config::Config;
use crate::download::{Downloader, HttpDownloader};
use crate::error::{Error, Result};
use crate::export::{ExportRequest, ExportRequester, HttpExportRequester};
use crate::extraction::{ArchiveExtractor, ZipExtractor};
use crate::processing::StreamProcessor;
use crate::types::{Event, RunId, RunSummary, Stage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Where a run starts
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineInput {
    /// Request a new export, then wait, download, extract and process it
    Export(ExportRequest),
    /// Download an already exported archive, then extract and process it
    DownloadUrl(String),
    /// Extract and process an archive already on disk
    Archive(PathBuf),
    /// Process a directory of already extracted files
    Directory(PathBuf),
}

/// State of a run
///
/// `Processed` and `Failed` are terminal.
#[derive(Debug)]
pub enum PipelineState {
    /// The export exists remotely and can be downloaded from `download_url`
    Requested {
        /// URL the archive is downloaded from
        download_url: String,
        /// Whether the export was requested by this run, so the job wait applies
        awaiting_job: bool,
    },
    /// The archive is on local disk
    Downloaded {
        /// Local archive path
        archive: PathBuf,
    },
    /// The archive has been unpacked
    Extracted {
        /// Directory holding the input files
        directory: PathBuf,
    },
    /// Chunk files and summary are written
    Processed(RunSummary),
    /// A stage failed; nothing after it ran
    Failed {
        /// Stage that failed
        stage: Stage,
        /// What went wrong
        error: Error,
    },
}

impl PipelineState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Processed(_) | PipelineState::Failed { .. })
    }

    /// The stage the next transition runs, if any
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Requested { .. } => Some(Stage::Download),
            PipelineState::Downloaded { .. } => Some(Stage::Extract),
            PipelineState::Extracted { .. } => Some(Stage::Process),
            PipelineState::Processed(_) | PipelineState::Failed { .. } => None,
        }
    }
}

/// Builds runs from shared configuration and collaborators
///
/// Every [`run`](Self::run) (or [`begin`](Self::begin)) gets its own run id,
/// so one coordinator can drive any number of runs without their files
/// colliding.
pub struct PipelineCoordinator {
    config: Config,
    pinned_run_id: Option<RunId>,
    exporter: Option<Arc<dyn ExportRequester>>,
    downloader: Arc<dyn Downloader>,
    extractor: Arc<dyn ArchiveExtractor>,
    event_tx: broadcast::Sender<Event>,
}

impl PipelineCoordinator {
    /// Create a coordinator with the default HTTP and zip collaborators
    ///
    /// Export requests are only possible when `export.endpoint` is configured.
    pub fn new(config: Config) -> Result<Self> {
        let exporter = match config.export.endpoint {
            Some(_) => Some(Arc::new(HttpExportRequester::new(&config.export)?)
                as Arc<dyn ExportRequester>),
            None => None,
        };
        let downloader = Arc::new(HttpDownloader::new(&config.download)?);
        let extractor = Arc::new(ZipExtractor::new());

        Self::build(config, exporter, downloader, extractor)
    }

    /// Create a coordinator with custom collaborators
    pub fn with_collaborators(
        config: Config,
        exporter: Arc<dyn ExportRequester>,
        downloader: Arc<dyn Downloader>,
        extractor: Arc<dyn ArchiveExtractor>,
    ) -> Result<Self> {
        Self::build(config, Some(exporter), downloader, extractor)
    }

    fn build(
        config: Config,
        exporter: Option<Arc<dyn ExportRequester>>,
        downloader: Arc<dyn Downloader>,
        extractor: Arc<dyn ArchiveExtractor>,
    ) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            pinned_run_id: None,
            exporter,
            downloader,
            extractor,
            event_tx,
        })
    }

    /// Name every run after `run_id` instead of generating a fresh id
    ///
    /// Runs sharing a pinned id share their work directory and output file
    /// names: a later run replaces the earlier run's extracted files, and
    /// chunk files with a higher index than the later run writes stay on
    /// disk. Pin an id only to resume or repeat one logical run.
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.pinned_run_id = Some(run_id);
        self
    }

    /// Subscribe to events for every run of this coordinator
    ///
    /// Stage events and stream processor events arrive on the same channel;
    /// each carries the run id it belongs to.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Start a new run, named by a fresh run id unless one is pinned
    pub fn begin(&self) -> PipelineRun<'_> {
        let run_id = self
            .pinned_run_id
            .clone()
            .unwrap_or_else(RunId::generate);
        debug!(%run_id, pinned = self.pinned_run_id.is_some(), "new pipeline run");

        PipelineRun {
            coordinator: self,
            run_id,
        }
    }

    /// Drive a new run from `input` to a terminal state
    ///
    /// Returns the summary on success, or [`Error::StageFailed`] naming the
    /// stage that failed.
    pub async fn run(&self, input: PipelineInput) -> Result<RunSummary> {
        self.begin().run(input).await
    }
}

/// One invocation of the pipeline
pub struct PipelineRun<'a> {
    coordinator: &'a PipelineCoordinator,
    run_id: RunId,
}

impl PipelineRun<'_> {
    /// Run id every file of this run is named after
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Working directory of this run: `<work_dir>/<run_id>`
    pub fn run_dir(&self) -> PathBuf {
        self.coordinator
            .config
            .download
            .work_dir
            .join(self.run_id.as_str())
    }

    /// Drive this run from `input` to a terminal state
    pub async fn run(&self, input: PipelineInput) -> Result<RunSummary> {
        info!(run_id = %self.run_id, ?input, "starting pipeline run");

        let mut state = self.start(input).await;
        loop {
            match state {
                PipelineState::Processed(summary) => {
                    info!(
                        run_id = %self.run_id,
                        total_records = summary.total_records,
                        chunks_written = summary.chunks_written,
                        "pipeline run complete"
                    );
                    return Ok(summary);
                }
                PipelineState::Failed { stage, error } => {
                    return Err(Error::StageFailed {
                        stage,
                        source: Box::new(error),
                    });
                }
                other => state = self.advance(other).await,
            }
        }
    }

    /// Turn a run input into its first state
    ///
    /// Only `PipelineInput::Export` does any work here (the export request);
    /// every other input maps directly onto the state it resumes from.
    pub async fn start(&self, input: PipelineInput) -> PipelineState {
        match input {
            PipelineInput::Export(request) => self.run_export_stage(&request).await,
            PipelineInput::DownloadUrl(download_url) => PipelineState::Requested {
                download_url,
                awaiting_job: false,
            },
            PipelineInput::Archive(archive) => PipelineState::Downloaded { archive },
            PipelineInput::Directory(directory) => PipelineState::Extracted { directory },
        }
    }

    /// Perform exactly one transition
    ///
    /// Terminal states are returned unchanged.
    pub async fn advance(&self, state: PipelineState) -> PipelineState {
        match state {
            PipelineState::Requested {
                download_url,
                awaiting_job,
            } => {
                if awaiting_job {
                    self.wait_for_job().await;
                }
                self.run_download_stage(&download_url).await
            }
            PipelineState::Downloaded { archive } => self.run_extract_stage(archive).await,
            PipelineState::Extracted { directory } => self.run_process_stage(directory).await,
            terminal @ (PipelineState::Processed(_) | PipelineState::Failed { .. }) => terminal,
        }
    }

    async fn run_export_stage(&self, request: &ExportRequest) -> PipelineState {
        self.stage_started(Stage::Export);

        let Some(exporter) = &self.coordinator.exporter else {
            return self.stage_failed(
                Stage::Export,
                Error::config(
                    "export.endpoint",
                    "export.endpoint is required to request an export",
                ),
            );
        };

        let location = match exporter.request_export(request).await {
            Ok(location) => location,
            Err(e) => return self.stage_failed(Stage::Export, e),
        };

        match location.resolve(self.coordinator.config.export.bucket.as_deref()) {
            Ok(download_url) => {
                self.stage_complete(Stage::Export);
                PipelineState::Requested {
                    download_url,
                    awaiting_job: true,
                }
            }
            Err(e) => self.stage_failed(Stage::Export, e.into()),
        }
    }

    async fn wait_for_job(&self) {
        let wait = self.coordinator.config.export.job_wait;
        if wait.is_zero() {
            return;
        }

        info!(
            run_id = %self.run_id,
            seconds = wait.as_secs(),
            "waiting for export job before downloading"
        );
        self.emit(Event::WaitingForJob {
            run_id: self.run_id.clone(),
            seconds: wait.as_secs(),
        });
        tokio::time::sleep(wait).await;
    }

    async fn run_download_stage(&self, download_url: &str) -> PipelineState {
        self.stage_started(Stage::Download);

        let downloader = &self.coordinator.downloader;
        match downloader.download(download_url, &self.run_dir()).await {
            Ok(archive) => {
                self.stage_complete(Stage::Download);
                PipelineState::Downloaded { archive }
            }
            Err(e) => self.stage_failed(Stage::Download, e),
        }
    }

    async fn run_extract_stage(&self, archive: PathBuf) -> PipelineState {
        self.stage_started(Stage::Extract);

        let extractor = &self.coordinator.extractor;
        let dest = self.run_dir().join("extracted");
        debug!(
            run_id = %self.run_id,
            ?archive,
            ?dest,
            extractor = extractor.name(),
            "extracting archive"
        );

        // Files left by an earlier extract under the same run id
        if let Err(e) = clear_dir(&dest).await {
            return self.stage_failed(Stage::Extract, e);
        }

        match extractor.extract(&archive, &dest).await {
            Ok(directory) => {
                self.stage_complete(Stage::Extract);
                PipelineState::Extracted { directory }
            }
            Err(e) => self.stage_failed(Stage::Extract, e),
        }
    }

    async fn run_process_stage(&self, directory: PathBuf) -> PipelineState {
        self.stage_started(Stage::Process);

        let processing = &self.coordinator.config.processing;
        let processor = StreamProcessor::new(processing.clone(), self.run_id.clone())
            .with_events(self.coordinator.event_tx.clone());

        match processor
            .process_directory(&directory, processing.limits)
            .await
        {
            Ok(summary) => {
                self.stage_complete(Stage::Process);
                PipelineState::Processed(summary)
            }
            Err(e) => self.stage_failed(Stage::Process, e),
        }
    }

    fn stage_started(&self, stage: Stage) {
        debug!(run_id = %self.run_id, %stage, "stage started");
        self.emit(Event::StageStarted {
            run_id: self.run_id.clone(),
            stage,
        });
    }

    fn stage_complete(&self, stage: Stage) {
        info!(run_id = %self.run_id, %stage, "stage complete");
        self.emit(Event::StageComplete {
            run_id: self.run_id.clone(),
            stage,
        });
    }

    fn stage_failed(&self, stage: Stage, error: Error) -> PipelineState {
        warn!(
            run_id = %self.run_id,
            %stage,
            error = %error,
            code = error.error_code(),
            "stage failed"
        );
        self.emit(Event::Failed {
            run_id: self.run_id.clone(),
            stage,
            error: error.to_string(),
        });
        PipelineState::Failed { stage, error }
    }

    fn emit(&self, event: Event) {
        self.coordinator.event_tx.send(event).ok();
    }
}

/// Remove a directory and everything in it, if it exists
async fn clear_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
