use crate::{ArchiveStage, FileStatus, GatherStage, RunTotals, Step};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportViewModel {
    pub step: Step,
    pub audit_id: Option<String>,
    pub gather: Option<GatherView>,
    /// One row per descriptor, in descriptor order.
    pub files: Vec<FileRow>,
    pub completed_files: usize,
    pub summary: Option<RunTotals>,
    pub archive: Option<ArchiveView>,
    pub archive_path: Option<String>,
    pub truncated: bool,
    pub elapsed_ms: Option<u64>,
    pub error: Option<String>,
    pub dirty: bool,
}

impl ExportViewModel {
    pub fn failed_files(&self) -> impl Iterator<Item = &FileRow> {
        self.files.iter().filter(|f| f.status == FileStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherView {
    pub stage: GatherStage,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    pub index: usize,
    pub path: String,
    pub status: FileStatus,
    pub received_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub error: Option<String>,
}

impl FileRow {
    pub(crate) fn pending(index: usize) -> Self {
        Self {
            index,
            path: String::new(),
            status: FileStatus::Pending,
            received_bytes: None,
            total_bytes: None,
            error: None,
        }
    }

    /// Whole-number percentage, when the server declared a length.
    pub fn percent(&self) -> Option<u8> {
        let total = self.total_bytes.filter(|t| *t > 0)?;
        let received = self.received_bytes?.min(total);
        Some(((received * 100) / total) as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveView {
    pub stage: ArchiveStage,
    pub files_processed: usize,
    pub total_files: usize,
    pub bytes_processed: u64,
    pub total_bytes: Option<u64>,
    pub archive_size: Option<u64>,
    pub message: String,
}
