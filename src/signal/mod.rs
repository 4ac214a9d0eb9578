//! Operator interrupt handling (SIGINT/SIGTERM)
//!
//! On the first signal: print "Aborting." and request cancellation. The
//! publish and gc loops check the flag between units and unwind normally, so
//! the temporary clone is removed and no state write is left half done.
//!
//! On a second signal: exit immediately with [`EXIT_CODE_INTERRUPTED`].

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code for interrupted runs (128 + SIGINT)
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Signal handler state
#[derive(Debug, Default)]
pub struct SignalState {
    /// First signal received (cancellation requested)
    cancel_requested: AtomicBool,
    /// Signal count (for tracking double-SIGINT)
    signal_count: AtomicU8,
}

impl SignalState {
    /// Create a new signal state
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Get the number of signals received
    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Handle a signal (SIGINT/SIGTERM)
    ///
    /// Returns the appropriate action to take
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        if count == 0 {
            self.cancel_requested.store(true, Ordering::SeqCst);
            SignalAction::InitiateCancellation
        } else if count == 1 {
            SignalAction::ImmediateExit
        } else {
            SignalAction::Ignore
        }
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: stop after the current unit
    InitiateCancellation,
    /// Second signal: exit now
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Installs the process-wide handler and hands out the shared state
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Create a new signal handler
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    /// Get a reference to the signal state
    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the handler for SIGINT and SIGTERM.
    ///
    /// Must be called once at program startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::InitiateCancellation => {
                eprintln!("\nAborting.");
            }
            SignalAction::ImmediateExit => {
                eprintln!("\nReceived second interrupt, exiting immediately.");
                std::process::exit(EXIT_CODE_INTERRUPTED);
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
