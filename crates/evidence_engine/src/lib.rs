//! Evidence engine: discovery, concurrent retrieval and archiving of audit evidence.
mod archive;
mod cache;
mod download;
mod engine;
mod fetch;
mod filename;
mod gather;
mod persist;
mod progress;
mod retry;
mod source;
mod types;

pub use archive::{build_archive, ArchiveError, ArchiveOptions, DEFAULT_COMPRESSION_LEVEL};
pub use cache::TtlCache;
pub use download::{
    DownloadError, DownloadOptions, Downloader, DEFAULT_CONCURRENCY, DEFAULT_FOLDER_PREFIX,
};
pub use engine::{
    ArchiveRequest, EngineConfig, ExportHandle, ExportReport, ExportRequest, PipelineError,
    PipelineEvent, STAGING_DIR_NAME,
};
pub use fetch::{validate_url, ByteProgress, FetchSettings, Fetcher, ReqwestFetcher};
pub use filename::{
    descriptor_file_name, group_folder_name, infer_extension, plan_target_paths,
    sanitize_file_name, FolderStructure,
};
pub use gather::{gather_descriptors, GatherError, GatherSettings};
pub use persist::{ensure_output_dir, part_path, PersistError};
pub use progress::{ChannelProgressSink, NullProgressSink, ProgressSink};
pub use retry::{retry_with_backoff, IsRetryable, RetryPolicy};
pub use source::{EvidenceSource, SourceError};
pub use types::{
    ArchivePhase, ArchiveProgress, ArchiveSummary, DownloadDescriptor, DownloadOutcome,
    DownloadProgress, DownloadStatus, DownloadSummary, EvidenceItem, EvidenceUrl,
    FailedDownload, FailureKind, GatherPhase, GatherProgress, GatherResult, Page, TransferError,
};
