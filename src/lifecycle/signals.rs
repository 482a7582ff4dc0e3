//! OS signal handling.
//!
//! # Responsibilities
//! - Register the interrupt/terminate handler (SIGINT, SIGTERM)
//! - Translate the signal into the shutdown flag
//!
//! # Design Decisions
//! - The handler only flips the flag; unwinding happens on the reactor thread
//! - A second signal while stopping is logged and otherwise ignored

use crate::lifecycle::Shutdown;

pub type SignalError = ctrlc::Error;

/// Install the process-wide handler that triggers `shutdown`.
///
/// Can only succeed once per process.
pub fn install(shutdown: &Shutdown) -> Result<(), SignalError> {
    let shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        if shutdown.is_triggered() {
            tracing::warn!("Shutdown already in progress");
            return;
        }
        tracing::info!("Graceful shutdown requested");
        shutdown.trigger();
    })
}
