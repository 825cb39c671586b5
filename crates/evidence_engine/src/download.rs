use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use export_logging::{export_debug, export_error, export_info, export_warn};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::fetch::{validate_url, ByteProgress, Fetcher};
use crate::filename::{plan_target_paths, FolderStructure};
use crate::persist::{completed_file_size, discard_part, ensure_output_dir, part_path, PersistError};
use crate::progress::ProgressSink;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{
    DownloadDescriptor, DownloadOutcome, DownloadProgress, DownloadStatus, DownloadSummary,
    FailedDownload, FailureKind, TransferError,
};

pub const DEFAULT_CONCURRENCY: usize = 6;
pub const DEFAULT_FOLDER_PREFIX: &str = "evidence";

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub output_dir: PathBuf,
    pub structure: FolderStructure,
    /// Folder name prefix for [`FolderStructure::Separate`]; defaults to `evidence`.
    pub folder_prefix: Option<String>,
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl DownloadOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            structure: FolderStructure::Single,
            folder_prefix: None,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no files to download")]
    NoDescriptors,
    #[error(transparent)]
    OutputDir(#[from] PersistError),
}

/// Retrieves descriptors to disk through a bounded pool of concurrent transfers.
pub struct Downloader {
    fetcher: Arc<dyn Fetcher>,
}

impl Downloader {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Download every descriptor and aggregate the outcomes.
    ///
    /// Individual failures are reported through `sink` and counted in the
    /// summary; they never abort sibling downloads. Cancelling `cancel` stops
    /// dispatch and aborts in-flight transfers, each reported as
    /// [`DownloadStatus::Cancelled`].
    pub async fn run(
        &self,
        descriptors: Vec<DownloadDescriptor>,
        options: &DownloadOptions,
        sink: Arc<dyn ProgressSink<DownloadProgress>>,
        cancel: CancellationToken,
    ) -> Result<DownloadSummary, DownloadError> {
        if descriptors.is_empty() {
            return Err(DownloadError::NoDescriptors);
        }
        ensure_output_dir(&options.output_dir)?;

        let prefix = options
            .folder_prefix
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_FOLDER_PREFIX);
        let targets = plan_target_paths(&descriptors, &options.output_dir, options.structure, prefix);
        let total = descriptors.len();

        export_info!(
            "Downloading {} files to {:?} (concurrency {}, max retries {})",
            total,
            options.output_dir,
            options.concurrency,
            options.retry.max_retries
        );
        for (index, target) in targets.iter().enumerate() {
            sink.emit(progress_event(index, total, target, DownloadStatus::Pending));
        }

        let tally = Arc::new(Tally::default());
        let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let mut workers = JoinSet::new();
        let mut units = descriptors.into_iter().zip(targets).enumerate();

        while let Some((index, (descriptor, target))) = units.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = permits.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                export_info!("Download cancelled; {} files not started", total - index);
                let remaining = std::iter::once((index, (descriptor, target))).chain(units.by_ref());
                for (index, (_, target)) in remaining {
                    sink.emit(progress_event(index, total, &target, DownloadStatus::Cancelled));
                    tally.record(index, &target, &DownloadOutcome::Cancelled);
                }
                break;
            };

            let unit = Unit {
                fetcher: self.fetcher.clone(),
                descriptor,
                index,
                total,
                target,
                retry: options.retry,
                sink: sink.clone(),
                cancel: cancel.clone(),
            };
            let tally = tally.clone();
            workers.spawn(async move {
                let _permit = permit;
                let target = unit.target.clone();
                let outcome = unit.run().await;
                tally.record(index, &target, &outcome);
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                export_error!("Download worker ended abnormally: {}", err);
            }
        }

        let summary = tally.summary();
        export_info!(
            "Downloads finished: {} succeeded, {} failed, {} skipped, {} cancelled, {} bytes",
            summary.successes,
            summary.failures,
            summary.skipped,
            summary.cancelled,
            summary.total_size
        );
        Ok(summary)
    }
}

/// One descriptor's lifecycle: directory, skip check, validation, transfer.
struct Unit {
    fetcher: Arc<dyn Fetcher>,
    descriptor: DownloadDescriptor,
    index: usize,
    total: usize,
    target: PathBuf,
    retry: RetryPolicy,
    sink: Arc<dyn ProgressSink<DownloadProgress>>,
    cancel: CancellationToken,
}

impl Unit {
    async fn run(self) -> DownloadOutcome {
        let (index, total) = (self.index, self.total);

        if let Some(parent) = self.target.parent() {
            if let Err(err) = ensure_output_dir(parent) {
                return self.fail(TransferError::new(FailureKind::Io, err.to_string()));
            }
        }

        if let Some(bytes) = completed_file_size(&self.target) {
            export_info!("[{}/{}] Skipping {:?}: already downloaded", index + 1, total, self.target);
            self.sink.emit(DownloadProgress {
                total_bytes: Some(bytes),
                ..progress_event(index, total, &self.target, DownloadStatus::Skipped)
            });
            return DownloadOutcome::Skipped { bytes };
        }

        if let Err(err) = validate_url(&self.descriptor.url) {
            return self.fail(err);
        }

        self.sink
            .emit(progress_event(index, total, &self.target, DownloadStatus::Downloading));

        let sink = self.sink.clone();
        let target = self.target.clone();
        let on_bytes = move |received: u64, declared: Option<u64>| {
            sink.emit(DownloadProgress {
                received_bytes: Some(received),
                total_bytes: declared,
                ..progress_event(index, total, &target, DownloadStatus::Downloading)
            });
        };

        let fetcher: &dyn Fetcher = self.fetcher.as_ref();
        let url = self.descriptor.url.as_str();
        let target_path = self.target.as_path();
        let on_bytes: &ByteProgress<'_> = &on_bytes;
        let transfer = retry_with_backoff(&self.retry, move |attempt| {
            if attempt > 1 {
                export_debug!("[{}/{}] Attempt {} for {:?}", index + 1, total, attempt, target_path);
            }
            fetcher.fetch_to_file(url, target_path, on_bytes)
        });

        let result = tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = transfer => Some(result),
        };

        match result {
            None => {
                discard_part(&part_path(&self.target)).await;
                export_info!("[{}/{}] Cancelled {:?}", index + 1, total, self.target);
                self.sink
                    .emit(progress_event(index, total, &self.target, DownloadStatus::Cancelled));
                DownloadOutcome::Cancelled
            }
            Some(Ok(bytes)) => {
                export_info!("[{}/{}] Saved {:?} ({} bytes)", index + 1, total, self.target, bytes);
                self.sink.emit(DownloadProgress {
                    total_bytes: Some(bytes),
                    ..progress_event(index, total, &self.target, DownloadStatus::Success)
                });
                DownloadOutcome::Success { bytes }
            }
            Some(Err(err)) => self.fail(err),
        }
    }

    fn fail(&self, error: TransferError) -> DownloadOutcome {
        export_warn!(
            "[{}/{}] Failed {:?}: {}",
            self.index + 1,
            self.total,
            self.target,
            error
        );
        self.sink.emit(DownloadProgress {
            error: Some(error.message.clone()),
            ..progress_event(self.index, self.total, &self.target, DownloadStatus::Failed)
        });
        DownloadOutcome::Failed { error }
    }
}

#[derive(Default)]
struct Tally {
    successes: AtomicUsize,
    failures: AtomicUsize,
    skipped: AtomicUsize,
    cancelled: AtomicUsize,
    total_size: AtomicU64,
    failed: Mutex<Vec<FailedDownload>>,
}

impl Tally {
    fn record(&self, index: usize, target: &Path, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::Success { bytes } => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                self.total_size.fetch_add(*bytes, Ordering::Relaxed);
            }
            DownloadOutcome::Skipped { bytes } => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                self.total_size.fetch_add(*bytes, Ordering::Relaxed);
            }
            DownloadOutcome::Failed { error } => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.failed
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(FailedDownload {
                        index,
                        target_path: target.to_path_buf(),
                        message: error.message.clone(),
                    });
            }
            DownloadOutcome::Cancelled => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn summary(&self) -> DownloadSummary {
        let mut failed = self
            .failed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        failed.sort_by_key(|f| f.index);
        DownloadSummary {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            total_size: self.total_size.load(Ordering::Relaxed),
            failed,
        }
    }
}

fn progress_event(index: usize, total: usize, target: &Path, status: DownloadStatus) -> DownloadProgress {
    DownloadProgress {
        index,
        total,
        target_path: target.to_path_buf(),
        received_bytes: None,
        total_bytes: None,
        status,
        error: None,
    }
}
