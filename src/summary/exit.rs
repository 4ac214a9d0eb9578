//! Stable process exit codes

use serde::{Deserialize, Serialize};

use crate::signal::EXIT_CODE_INTERRUPTED;

/// Exit status of a publish or gc run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitCode {
    /// No errors
    Success,
    /// At least one counted error
    Errors,
    /// Invalid or missing configuration; no work was done
    Config,
    /// Stopped by operator interrupt
    Interrupted,
}

impl ExitCode {
    /// Exit code for a finished run.
    pub fn for_run(error_count: usize, interrupted: bool) -> Self {
        if interrupted {
            ExitCode::Interrupted
        } else if error_count > 0 {
            ExitCode::Errors
        } else {
            ExitCode::Success
        }
    }

    /// Get the integer value of the exit code
    pub fn as_i32(&self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Errors => 1,
            ExitCode::Config => 2,
            ExitCode::Interrupted => EXIT_CODE_INTERRUPTED,
        }
    }

    /// Check if this exit code indicates success
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}
