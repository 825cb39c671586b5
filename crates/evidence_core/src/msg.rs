use crate::{ArchiveStage, FileStatus, GatherStage, RunTotals};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// The pipeline was launched for an audit.
    Started { audit_id: String },
    /// Discovery progress.
    GatherProgress {
        stage: GatherStage,
        current: usize,
        total: usize,
        message: String,
    },
    /// Progress for one file, addressed by its position in the descriptor list.
    FileProgress(FileUpdate),
    /// Every download reached a terminal state.
    DownloadsFinished(RunTotals),
    /// Archive build progress.
    ArchiveProgress(ArchiveUpdate),
    /// The pipeline completed.
    Finished {
        archive_path: Option<String>,
        elapsed_ms: u64,
        truncated: bool,
    },
    /// The pipeline stopped with an error or was cancelled.
    Failed { message: String, cancelled: bool },
    /// User pressed Ctrl-C.
    InterruptRequested,
    /// Render tick.
    Tick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
    pub index: usize,
    pub total: usize,
    pub path: String,
    pub status: FileStatus,
    pub received_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveUpdate {
    pub stage: ArchiveStage,
    pub files_processed: usize,
    pub total_files: usize,
    pub bytes_processed: u64,
    pub total_bytes: Option<u64>,
    pub archive_size: Option<u64>,
    pub message: String,
}
