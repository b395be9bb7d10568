//! Live signal
//!
//! Set by the sync orchestrator when a stored game is in progress; read by
//! everything that picks a refresh cadence.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct LiveSignal {
    live: AtomicBool,
}

impl LiveSignal {
    pub fn new(live: bool) -> Self {
        Self {
            live: AtomicBool::new(live),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Update the signal, returning the previous value
    pub fn set(&self, live: bool) -> bool {
        let previous = self.live.swap(live, Ordering::AcqRel);
        if previous != live {
            info!("Live mode {}", if live { "entered" } else { "left" });
        }
        previous
    }
}
