//! Plain-text progress and run summary.

use evidence_core::{ArchiveStage, ExportViewModel, FileStatus, GatherStage, Step};

/// Print a processing line every this many evidence items.
const PROCESSING_EVERY: usize = 25;

/// `B`, `KB`, `MB`, `GB` in powers of 1024 with one decimal.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

pub fn format_elapsed(ms: u64) -> String {
    let secs = ms / 1000;
    match secs {
        0 => format!("{ms}ms"),
        1..=59 => format!("{}.{}s", secs, (ms % 1000) / 100),
        _ => format!("{}m {:02}s", secs / 60, secs % 60),
    }
}

/// Turns successive view models into the lines worth printing, so each
/// transition is reported once.
#[derive(Debug, Default)]
pub struct Reporter {
    step: Option<Step>,
    discovered: Option<usize>,
    processed: usize,
    reported_files: Vec<bool>,
    archive_stage: Option<ArchiveStage>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&mut self, view: &ExportViewModel) -> Vec<String> {
        let mut out = Vec::new();

        if self.step != Some(view.step) {
            match view.step {
                Step::Gathering => out.push(format!(
                    "Discovering evidence for audit {}...",
                    view.audit_id.as_deref().unwrap_or("?")
                )),
                Step::Downloading => {
                    out.push(format!("Downloading {} files...", view.files.len()))
                }
                Step::Archiving => out.push("Creating archive...".to_string()),
                _ => {}
            }
            self.step = Some(view.step);
        }

        if let Some(gather) = &view.gather {
            match gather.stage {
                GatherStage::Discovering if gather.current > 0 => {
                    if self.discovered != Some(gather.current) {
                        out.push(format!("  {}", gather.message));
                        self.discovered = Some(gather.current);
                    }
                }
                GatherStage::Processing => {
                    let due = gather.current == gather.total
                        || gather.current >= self.processed + PROCESSING_EVERY;
                    if due && gather.current > self.processed {
                        out.push(format!(
                            "  Processed {}/{} evidence items",
                            gather.current, gather.total
                        ));
                        self.processed = gather.current;
                    }
                }
                _ => {}
            }
        }

        if self.reported_files.len() < view.files.len() {
            self.reported_files.resize(view.files.len(), false);
        }
        let total = view.files.len();
        for row in &view.files {
            if !row.status.is_terminal() || self.reported_files[row.index] {
                continue;
            }
            self.reported_files[row.index] = true;
            let position = format!("[{}/{}]", row.index + 1, total);
            let line = match row.status {
                FileStatus::Success => format!(
                    "{position} saved   {}{}",
                    row.path,
                    size_suffix(row.total_bytes)
                ),
                FileStatus::Skipped => format!(
                    "{position} exists  {}{}",
                    row.path,
                    size_suffix(row.total_bytes)
                ),
                FileStatus::Failed => format!(
                    "{position} FAILED  {}: {}",
                    row.path,
                    row.error.as_deref().unwrap_or("unknown error")
                ),
                FileStatus::Cancelled => format!("{position} cancelled {}", row.path),
                FileStatus::Pending | FileStatus::Downloading => continue,
            };
            out.push(line);
        }

        if let Some(archive) = &view.archive {
            if self.archive_stage != Some(archive.stage) {
                let line = match archive.stage {
                    ArchiveStage::Preparing => format!(
                        "  Packing {} files ({})",
                        archive.total_files,
                        format_bytes(archive.total_bytes.unwrap_or(0))
                    ),
                    ArchiveStage::Archiving => "  Adding files...".to_string(),
                    ArchiveStage::Finalizing => "  Finalizing archive...".to_string(),
                    ArchiveStage::Complete => format!(
                        "  Archive written ({})",
                        format_bytes(archive.archive_size.unwrap_or(0))
                    ),
                };
                out.push(line);
                self.archive_stage = Some(archive.stage);
            }
        }

        out
    }
}

fn size_suffix(bytes: Option<u64>) -> String {
    bytes
        .map(|b| format!(" ({})", format_bytes(b)))
        .unwrap_or_default()
}

/// End-of-run report.
pub fn summary_lines(view: &ExportViewModel) -> Vec<String> {
    let mut out = vec![String::new()];
    match view.step {
        Step::Finished => out.push("Export complete".to_string()),
        Step::Cancelled => out.push("Export cancelled".to_string()),
        Step::Failed => out.push(format!(
            "Export failed: {}",
            view.error.as_deref().unwrap_or("unknown error")
        )),
        _ => out.push("Export interrupted".to_string()),
    }

    if let Some(totals) = &view.summary {
        out.push(format!("  Downloaded: {}", totals.successes));
        out.push(format!("  Skipped:    {} (already present)", totals.skipped));
        out.push(format!("  Failed:     {}", totals.failures));
        if totals.cancelled > 0 {
            out.push(format!("  Cancelled:  {}", totals.cancelled));
        }
        out.push(format!("  Total size: {}", format_bytes(totals.total_size)));
    }
    let failed: Vec<_> = view.failed_files().collect();
    if !failed.is_empty() {
        out.push("  Failed files:".to_string());
        for row in failed {
            out.push(format!(
                "    {}: {}",
                row.path,
                row.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
    if view.truncated {
        out.push("  Warning: the evidence listing was cut off at the page limit".to_string());
    }
    if let Some(path) = &view.archive_path {
        let size = view
            .archive
            .as_ref()
            .and_then(|a| a.archive_size)
            .map(|s| format!(" ({})", format_bytes(s)))
            .unwrap_or_default();
        out.push(format!("  Archive:    {path}{size}"));
    }
    if let Some(ms) = view.elapsed_ms {
        out.push(format!("  Elapsed:    {}", format_elapsed(ms)));
    }
    out
}
