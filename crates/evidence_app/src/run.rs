//! Drives one export: engine events in, state updates, terminal output out.

use std::time::Duration;

use chrono::Utc;
use evidence_core::{
    update, ArchiveStage, ArchiveUpdate, Effect, ExportState, FileStatus, FileUpdate, GatherStage,
    Msg, RunTotals,
};
use evidence_engine::{
    ArchivePhase, ArchiveProgress, DownloadProgress, DownloadStatus, DownloadSummary, ExportHandle,
    GatherPhase, PipelineError, PipelineEvent,
};
use export_logging::{export_info, export_warn};

use crate::report::{summary_lines, Reporter};

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Pump `handle` until the export reaches a terminal state and return the
/// process exit code. Ctrl-C cancels the export; a second one gives up on
/// waiting for it.
pub async fn run_export(handle: &ExportHandle, audit_id: &str, tick: Duration) -> i32 {
    let mut state = ExportState::new();
    let mut reporter = Reporter::new();
    let mut pending = vec![Msg::Started {
        audit_id: audit_id.to_string(),
    }];

    loop {
        let mut drained = 0;
        while let Some(event) = handle.try_recv() {
            pending.push(map_event(event));
            drained += 1;
        }
        if drained == 0 && handle.is_finished() && !state.step().is_terminal() {
            pending.push(Msg::Failed {
                message: "export worker stopped without a result".to_string(),
                cancelled: false,
            });
        }

        let mut exit = None;
        for msg in pending.drain(..) {
            let (next, effects) = update(state, msg);
            state = next;
            for effect in effects {
                match effect {
                    Effect::CancelExport => {
                        export_warn!("Interrupt received, cancelling export (press Ctrl-C again to quit)");
                        handle.cancel();
                    }
                    Effect::Exit { code } => exit = Some(code),
                }
            }
        }

        if state.consume_dirty() {
            for line in reporter.lines(&state.view()) {
                println!("{line}");
            }
        }

        if let Some(code) = exit {
            for line in summary_lines(&state.view()) {
                println!("{line}");
            }
            println!("  Finished:   {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
            export_info!("Export of audit {} ended with exit code {}", audit_id, code);
            return code;
        }

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    pending.push(Msg::InterruptRequested);
                }
            }
            _ = tokio::time::sleep(tick) => pending.push(Msg::Tick),
        }
    }
}

pub fn map_event(event: PipelineEvent) -> Msg {
    match event {
        PipelineEvent::Gather(progress) => Msg::GatherProgress {
            stage: map_gather_phase(progress.phase),
            current: progress.current,
            total: progress.total,
            message: progress.message,
        },
        PipelineEvent::Download(progress) => Msg::FileProgress(map_download(progress)),
        PipelineEvent::DownloadsFinished(summary) => Msg::DownloadsFinished(map_totals(&summary)),
        PipelineEvent::Archive(progress) => Msg::ArchiveProgress(map_archive(progress)),
        PipelineEvent::Finished(report) => {
            if report.truncated {
                export_warn!(
                    "Evidence listing for audit {} hit the page limit; some files may be missing",
                    report.audit_id
                );
            }
            Msg::Finished {
                archive_path: report
                    .archive
                    .map(|archive| archive.output_path.display().to_string()),
                elapsed_ms: u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
                truncated: report.truncated,
            }
        }
        PipelineEvent::Failed(err) => Msg::Failed {
            cancelled: err == PipelineError::Cancelled,
            message: err.to_string(),
        },
    }
}

fn map_gather_phase(phase: GatherPhase) -> GatherStage {
    match phase {
        GatherPhase::Discovering => GatherStage::Discovering,
        GatherPhase::Processing => GatherStage::Processing,
        GatherPhase::Complete => GatherStage::Complete,
    }
}

fn map_status(status: DownloadStatus) -> FileStatus {
    match status {
        DownloadStatus::Pending => FileStatus::Pending,
        DownloadStatus::Downloading => FileStatus::Downloading,
        DownloadStatus::Success => FileStatus::Success,
        DownloadStatus::Skipped => FileStatus::Skipped,
        DownloadStatus::Failed => FileStatus::Failed,
        DownloadStatus::Cancelled => FileStatus::Cancelled,
    }
}

fn map_archive_phase(phase: ArchivePhase) -> ArchiveStage {
    match phase {
        ArchivePhase::Preparing => ArchiveStage::Preparing,
        ArchivePhase::Archiving => ArchiveStage::Archiving,
        ArchivePhase::Finalizing => ArchiveStage::Finalizing,
        ArchivePhase::Complete => ArchiveStage::Complete,
    }
}

fn map_download(progress: DownloadProgress) -> FileUpdate {
    FileUpdate {
        index: progress.index,
        total: progress.total,
        path: progress.target_path.display().to_string(),
        status: map_status(progress.status),
        received_bytes: progress.received_bytes,
        total_bytes: progress.total_bytes,
        error: progress.error,
    }
}

fn map_totals(summary: &DownloadSummary) -> RunTotals {
    RunTotals {
        successes: summary.successes,
        failures: summary.failures,
        skipped: summary.skipped,
        cancelled: summary.cancelled,
        total_size: summary.total_size,
    }
}

fn map_archive(progress: ArchiveProgress) -> ArchiveUpdate {
    ArchiveUpdate {
        stage: map_archive_phase(progress.phase),
        files_processed: progress.files_processed,
        total_files: progress.total_files,
        bytes_processed: progress.bytes_processed,
        total_bytes: progress.total_bytes,
        archive_size: progress.archive_size,
        message: progress.message,
    }
}
