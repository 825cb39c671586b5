use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use export_logging::{export_error, export_info, export_warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::archive::{build_archive, ArchiveOptions, DEFAULT_COMPRESSION_LEVEL};
use crate::download::{DownloadError, DownloadOptions, Downloader, DEFAULT_CONCURRENCY};
use crate::fetch::{FetchSettings, Fetcher, ReqwestFetcher};
use crate::filename::FolderStructure;
use crate::gather::{gather_descriptors, GatherSettings};
use crate::progress::ProgressSink;
use crate::retry::RetryPolicy;
use crate::source::EvidenceSource;
use crate::{ArchiveProgress, ArchiveSummary, DownloadProgress, DownloadSummary, GatherProgress};

/// Subdirectory of the output directory that holds downloads while an archive is built.
pub const STAGING_DIR_NAME: &str = ".tmp-download";

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub fetch: FetchSettings,
    pub gather: GatherSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRequest {
    pub file_name: String,
    pub compression_level: u32,
}

impl ArchiveRequest {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub audit_id: String,
    pub output_dir: PathBuf,
    pub structure: FolderStructure,
    pub folder_prefix: Option<String>,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// When set, files are staged and packed into `{output_dir}/{file_name}`.
    pub archive: Option<ArchiveRequest>,
}

impl ExportRequest {
    pub fn new(audit_id: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            audit_id: audit_id.into(),
            output_dir: output_dir.into(),
            structure: FolderStructure::Single,
            folder_prefix: None,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            archive: None,
        }
    }

    /// Directory the downloader writes into.
    pub fn download_dir(&self) -> PathBuf {
        match self.archive {
            Some(_) => self.output_dir.join(STAGING_DIR_NAME),
            None => self.output_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{0}")]
    Discovery(String),
    #[error("No evidence items found for this audit. The audit may not have any attached evidence.")]
    NoEvidence,
    #[error("cannot prepare download directory: {0}")]
    OutputDir(String),
    #[error("archive failed: {0}")]
    Archive(String),
    #[error("could not start export runtime: {0}")]
    Runtime(String),
    #[error("export cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub audit_id: String,
    pub evidence_count: usize,
    pub descriptor_count: usize,
    pub truncated: bool,
    pub downloads: DownloadSummary,
    pub archive: Option<ArchiveSummary>,
    /// Where downloaded files ended up; removed again once archived.
    pub download_dir: PathBuf,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Gather(GatherProgress),
    Download(DownloadProgress),
    DownloadsFinished(DownloadSummary),
    Archive(ArchiveProgress),
    Finished(ExportReport),
    Failed(PipelineError),
}

/// Runs one export (gather, download, optional archive) on a background thread
/// and hands its events back through a non-blocking channel.
pub struct ExportHandle {
    event_rx: mpsc::Receiver<PipelineEvent>,
    cancel: CancellationToken,
    worker: Option<thread::JoinHandle<()>>,
}

impl ExportHandle {
    pub fn start(
        source: Arc<dyn EvidenceSource>,
        request: ExportRequest,
        config: EngineConfig,
    ) -> Self {
        let fetch_settings = config.fetch.clone();
        Self::spawn(source, request, config, move || {
            ReqwestFetcher::new(fetch_settings)
                .map(|fetcher| Arc::new(fetcher) as Arc<dyn Fetcher>)
                .map_err(|err| PipelineError::Runtime(err.to_string()))
        })
    }

    /// Like [`ExportHandle::start`] with a caller-supplied transport.
    pub fn with_fetcher(
        source: Arc<dyn EvidenceSource>,
        fetcher: Arc<dyn Fetcher>,
        request: ExportRequest,
        config: EngineConfig,
    ) -> Self {
        Self::spawn(source, request, config, move || Ok(fetcher))
    }

    fn spawn<F>(
        source: Arc<dyn EvidenceSource>,
        request: ExportRequest,
        config: EngineConfig,
        make_fetcher: F,
    ) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn Fetcher>, PipelineError> + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let worker = thread::spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(err) => {
                    let error = PipelineError::Runtime(err.to_string());
                    let _ = event_tx.send(PipelineEvent::Failed(error));
                    return;
                }
            };
            let sink = Arc::new(PipelineSink { tx: event_tx.clone() });
            let result = runtime.block_on(async move {
                let fetcher = make_fetcher()?;
                run_pipeline(source, fetcher, request, config, sink, token).await
            });
            let event = match result {
                Ok(report) => PipelineEvent::Finished(report),
                Err(err) => {
                    export_error!("Export failed: {}", err);
                    PipelineEvent::Failed(err)
                }
            };
            let _ = event_tx.send(event);
        });

        Self {
            event_rx,
            cancel,
            worker: Some(worker),
        }
    }

    pub fn try_recv(&self) -> Option<PipelineEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event. `None` means nothing arrived
    /// or the pipeline has finished and the channel is drained.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PipelineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// True once the pipeline thread has exited. Events may still be queued.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    /// Stop dispatching downloads and abort in-flight ones.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for ExportHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct PipelineSink {
    tx: mpsc::Sender<PipelineEvent>,
}

impl ProgressSink<GatherProgress> for PipelineSink {
    fn emit(&self, event: GatherProgress) {
        let _ = self.tx.send(PipelineEvent::Gather(event));
    }
}

impl ProgressSink<DownloadProgress> for PipelineSink {
    fn emit(&self, event: DownloadProgress) {
        let _ = self.tx.send(PipelineEvent::Download(event));
    }
}

impl ProgressSink<ArchiveProgress> for PipelineSink {
    fn emit(&self, event: ArchiveProgress) {
        let _ = self.tx.send(PipelineEvent::Archive(event));
    }
}

async fn run_pipeline(
    source: Arc<dyn EvidenceSource>,
    fetcher: Arc<dyn Fetcher>,
    request: ExportRequest,
    config: EngineConfig,
    sink: Arc<PipelineSink>,
    cancel: CancellationToken,
) -> Result<ExportReport, PipelineError> {
    let started = Instant::now();
    export_info!("Starting export of audit {}", request.audit_id);

    let gathered = tokio::select! {
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        gathered = gather_descriptors(
            source.as_ref(),
            &request.audit_id,
            &config.gather,
            sink.as_ref(),
        ) => gathered,
    }
    .map_err(|err| PipelineError::Discovery(err.to_string()))?;
    if gathered.descriptors.is_empty() {
        return Err(PipelineError::NoEvidence);
    }
    let descriptor_count = gathered.descriptors.len();

    let download_dir = request.download_dir();
    let options = DownloadOptions {
        output_dir: download_dir.clone(),
        structure: request.structure,
        folder_prefix: request.folder_prefix.clone(),
        concurrency: request.concurrency,
        retry: request.retry,
    };
    let downloads = Downloader::new(fetcher)
        .run(gathered.descriptors, &options, sink.clone(), cancel.clone())
        .await
        .map_err(|err| match err {
            DownloadError::NoDescriptors => PipelineError::NoEvidence,
            DownloadError::OutputDir(err) => PipelineError::OutputDir(err.to_string()),
        })?;
    let _ = sink.tx.send(PipelineEvent::DownloadsFinished(downloads.clone()));

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    let archive = match &request.archive {
        Some(archive) => Some(archive_downloads(&request, archive, &download_dir, sink).await?),
        None => None,
    };

    Ok(ExportReport {
        audit_id: request.audit_id,
        evidence_count: gathered.evidence_count,
        descriptor_count,
        truncated: gathered.truncated,
        downloads,
        archive,
        download_dir,
        elapsed: started.elapsed(),
    })
}

async fn archive_downloads(
    request: &ExportRequest,
    archive: &ArchiveRequest,
    download_dir: &Path,
    sink: Arc<PipelineSink>,
) -> Result<ArchiveSummary, PipelineError> {
    let options = ArchiveOptions {
        source_dir: download_dir.to_path_buf(),
        output_path: request.output_dir.join(&archive.file_name),
        compression_level: archive.compression_level,
    };

    let built = tokio::task::spawn_blocking(move || build_archive(&options, sink.as_ref()))
        .await
        .map_err(|err| PipelineError::Archive(err.to_string()))?;

    match built {
        Ok(summary) => {
            if let Err(err) = tokio::fs::remove_dir_all(download_dir).await {
                export_warn!("Could not remove staging directory {:?}: {}", download_dir, err);
            }
            Ok(summary)
        }
        Err(err) => {
            export_error!(
                "Archive failed; downloaded files kept in {:?}: {}",
                download_dir,
                err
            );
            Err(PipelineError::Archive(err.to_string()))
        }
    }
}
