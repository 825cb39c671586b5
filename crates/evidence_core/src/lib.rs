//! Evidence core: pure export state machine and view-model helpers.
mod effect;
mod msg;
mod state;
mod update;
mod view_model;

pub use effect::{Effect, EXIT_CANCELLED, EXIT_FAILURE, EXIT_SUCCESS};
pub use msg::{ArchiveUpdate, FileUpdate, Msg};
pub use state::{ArchiveStage, ExportState, FileStatus, GatherStage, RunTotals, Step};
pub use update::update;
pub use view_model::{ArchiveView, ExportViewModel, FileRow, GatherView};
