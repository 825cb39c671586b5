use crate::msg::{ArchiveUpdate, FileUpdate};
use crate::view_model::{ArchiveView, ExportViewModel, FileRow, GatherView};

/// Where the export as a whole currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
    #[default]
    Idle,
    Gathering,
    Downloading,
    Archiving,
    Finished,
    Failed,
    Cancelled,
}

impl Step {
    pub fn is_terminal(self) -> bool {
        matches!(self, Step::Finished | Step::Failed | Step::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherStage {
    Discovering,
    Processing,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileStatus {
    #[default]
    Pending,
    Downloading,
    Success,
    Skipped,
    Failed,
    Cancelled,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, FileStatus::Pending | FileStatus::Downloading)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArchiveStage {
    Preparing,
    Archiving,
    Finalizing,
    Complete,
}

/// Aggregate outcome of the download stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunTotals {
    pub successes: usize,
    pub failures: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub total_size: u64,
}

impl RunTotals {
    /// At least one file was attempted and none of them made it to disk.
    pub fn all_failed(&self) -> bool {
        self.failures > 0 && self.successes == 0 && self.skipped == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportState {
    step: Step,
    audit_id: Option<String>,
    gather: Option<GatherView>,
    files: Vec<FileRow>,
    totals: Option<RunTotals>,
    archive: Option<ArchiveView>,
    archive_path: Option<String>,
    error: Option<String>,
    truncated: bool,
    elapsed_ms: Option<u64>,
    interrupted: bool,
    dirty: bool,
}

impl ExportState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn totals(&self) -> Option<RunTotals> {
        self.totals
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn view(&self) -> ExportViewModel {
        ExportViewModel {
            step: self.step,
            audit_id: self.audit_id.clone(),
            gather: self.gather.clone(),
            files: self.files.clone(),
            completed_files: self.files.iter().filter(|f| f.status.is_terminal()).count(),
            summary: self.totals,
            archive: self.archive.clone(),
            archive_path: self.archive_path.clone(),
            truncated: self.truncated,
            elapsed_ms: self.elapsed_ms,
            error: self.error.clone(),
            dirty: self.dirty,
        }
    }

    /// Returns whether anything changed since the last call and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn start(&mut self, audit_id: String) {
        *self = Self {
            step: Step::Gathering,
            audit_id: Some(audit_id),
            dirty: true,
            ..Self::default()
        };
    }

    pub(crate) fn apply_gather(&mut self, view: GatherView) {
        if self.step.is_terminal() {
            return;
        }
        if self.step == Step::Idle {
            self.step = Step::Gathering;
        }
        self.gather = Some(view);
        self.dirty = true;
    }

    pub(crate) fn apply_file(&mut self, update: FileUpdate) {
        if self.step.is_terminal() {
            return;
        }
        if matches!(self.step, Step::Idle | Step::Gathering) {
            self.step = Step::Downloading;
        }
        let wanted = update.total.max(update.index + 1);
        if self.files.len() < wanted {
            let start = self.files.len();
            self.files.extend((start..wanted).map(FileRow::pending));
        }

        let row = &mut self.files[update.index];
        // A file never leaves a terminal state; late progress is dropped.
        if row.status.is_terminal() {
            return;
        }
        row.path = update.path;
        row.status = update.status;
        if update.received_bytes.is_some() {
            row.received_bytes = update.received_bytes;
        }
        if update.total_bytes.is_some() {
            row.total_bytes = update.total_bytes;
        }
        row.error = update.error;
        self.dirty = true;
    }

    pub(crate) fn apply_totals(&mut self, totals: RunTotals) {
        self.totals = Some(totals);
        self.dirty = true;
    }

    pub(crate) fn apply_archive(&mut self, update: ArchiveUpdate) {
        if self.step.is_terminal() {
            return;
        }
        if let Some(current) = &self.archive {
            if update.stage < current.stage {
                return;
            }
        }
        self.step = Step::Archiving;
        self.archive = Some(ArchiveView {
            stage: update.stage,
            files_processed: update.files_processed,
            total_files: update.total_files,
            bytes_processed: update.bytes_processed,
            total_bytes: update.total_bytes,
            archive_size: update.archive_size,
            message: update.message,
        });
        self.dirty = true;
    }

    pub(crate) fn finish(&mut self, archive_path: Option<String>, elapsed_ms: u64, truncated: bool) {
        self.step = Step::Finished;
        self.archive_path = archive_path;
        self.elapsed_ms = Some(elapsed_ms);
        self.truncated = truncated;
        self.dirty = true;
    }

    pub(crate) fn fail(&mut self, message: String, cancelled: bool) {
        self.step = if cancelled || self.interrupted {
            Step::Cancelled
        } else {
            Step::Failed
        };
        self.error = Some(message);
        self.dirty = true;
    }

    pub(crate) fn interrupt(&mut self) {
        self.interrupted = true;
        self.dirty = true;
    }
}
