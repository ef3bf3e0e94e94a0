//! Pause Gate
//!
//! A shared open/closed flag checked by the progress-reporting path. Closing it
//! holds back progress messages; it does not suspend the transfer itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct PauseGate {
    paused: AtomicBool,
}

impl PauseGate {
    /// A gate starts open.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Poll every `interval` until the gate is open.
    pub async fn wait_open(&self, interval: Duration) {
        while self.is_paused() {
            tokio::time::sleep(interval).await;
        }
    }
}
