//! Run summaries and exit codes

mod exit;
mod run_summary;

pub use exit::ExitCode;
pub use run_summary::{RunKind, RunSummary};
