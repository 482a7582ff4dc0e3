//! Shutdown coordination for the balancer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stop flag shared between the reactor and whoever asks it to stop.
///
/// The reactor checks it once per turn; the bounded poll timeout guarantees
/// the check happens even when no socket is ready.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    /// Create a new, untriggered shutdown flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the reactor to stop.
    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
