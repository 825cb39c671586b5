use crate::effect::{EXIT_CANCELLED, EXIT_FAILURE, EXIT_SUCCESS};
use crate::view_model::GatherView;
use crate::{Effect, ExportState, Msg};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: ExportState, msg: Msg) -> (ExportState, Vec<Effect>) {
    let effects = match msg {
        Msg::Started { audit_id } => {
            state.start(audit_id);
            Vec::new()
        }
        Msg::GatherProgress {
            stage,
            current,
            total,
            message,
        } => {
            state.apply_gather(GatherView {
                stage,
                current,
                total,
                message,
            });
            Vec::new()
        }
        Msg::FileProgress(file) => {
            state.apply_file(file);
            Vec::new()
        }
        Msg::DownloadsFinished(totals) => {
            state.apply_totals(totals);
            Vec::new()
        }
        Msg::ArchiveProgress(archive) => {
            state.apply_archive(archive);
            Vec::new()
        }
        Msg::Finished {
            archive_path,
            elapsed_ms,
            truncated,
        } => {
            if state.step().is_terminal() {
                return (state, Vec::new());
            }
            state.finish(archive_path, elapsed_ms, truncated);
            let all_failed = state.totals().is_some_and(|t| t.all_failed());
            let code = if all_failed { EXIT_FAILURE } else { EXIT_SUCCESS };
            vec![Effect::Exit { code }]
        }
        Msg::Failed { message, cancelled } => {
            if state.step().is_terminal() {
                return (state, Vec::new());
            }
            state.fail(message, cancelled);
            let code = if cancelled || state.is_interrupted() {
                EXIT_CANCELLED
            } else {
                EXIT_FAILURE
            };
            vec![Effect::Exit { code }]
        }
        Msg::InterruptRequested => {
            if state.step().is_terminal() {
                Vec::new()
            } else if state.is_interrupted() {
                // Second Ctrl-C: stop waiting for in-flight cleanup.
                vec![Effect::Exit {
                    code: EXIT_CANCELLED,
                }]
            } else {
                state.interrupt();
                vec![Effect::CancelExport]
            }
        }
        Msg::Tick => Vec::new(),
    };

    (state, effects)
}
