pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
/// Conventional status for a run ended by SIGINT.
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Ask the running pipeline to stop.
    CancelExport,
    /// The run is over; the shell should exit with `code`.
    Exit { code: i32 },
}
