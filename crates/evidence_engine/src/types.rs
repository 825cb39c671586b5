use std::fmt;
use std::path::PathBuf;

/// One logical audit artifact, as returned by the evidence listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceItem {
    pub id: String,
    pub name: String,
}

/// One entry of an evidence item's URL listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvidenceUrl {
    pub url: String,
    pub id: Option<String>,
    pub filename: Option<String>,
    pub is_downloadable: Option<bool>,
}

/// A page of a cursor-paginated collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// One physical file to retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDescriptor {
    pub url: String,
    pub suggested_file_name: String,
    /// Id of the owning evidence item, used for per-evidence folders.
    pub group_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherPhase {
    Discovering,
    Processing,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherProgress {
    pub phase: GatherPhase,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherResult {
    pub descriptors: Vec<DownloadDescriptor>,
    pub evidence_count: usize,
    /// True when a pagination cap stopped a listing before the server ran out of pages.
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Success,
    Skipped,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DownloadStatus::Pending | DownloadStatus::Downloading)
    }
}

/// Per-descriptor progress. `index` is the descriptor's zero-based position in
/// the input sequence, independent of completion order.
///
/// While downloading, `received_bytes` counts bytes read off the wire. For a
/// compressed response that is the compressed size, so it can end well below
/// the size of the file written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    pub index: usize,
    pub total: usize,
    pub target_path: PathBuf,
    pub received_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub status: DownloadStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Skipped { bytes: u64 },
    Success { bytes: u64 },
    Failed { error: TransferError },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDownload {
    pub index: usize,
    pub target_path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DownloadSummary {
    pub successes: usize,
    pub failures: usize,
    pub skipped: usize,
    pub cancelled: usize,
    /// On-disk bytes of successful and skipped files.
    pub total_size: u64,
    /// Failures sorted by descriptor index.
    pub failed: Vec<FailedDownload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArchivePhase {
    Preparing,
    Archiving,
    Finalizing,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveProgress {
    pub phase: ArchivePhase,
    pub files_processed: usize,
    pub total_files: usize,
    /// Uncompressed source bytes added so far.
    pub bytes_processed: u64,
    pub total_bytes: Option<u64>,
    /// Compressed size of the finished archive; only set on `Complete`.
    pub archive_size: Option<u64>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub output_path: PathBuf,
    pub size: u64,
    pub file_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransferError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransferError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    TooManyRedirects,
    Timeout,
    Network,
    Stream,
    Io,
    Cancelled,
}

impl FailureKind {
    /// Malformed URLs and redirect loops fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FailureKind::InvalidUrl | FailureKind::TooManyRedirects | FailureKind::Cancelled
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::TooManyRedirects => write!(f, "too many redirects"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Stream => write!(f, "stream error"),
            FailureKind::Io => write!(f, "io error"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}
