//! Process-wide shutdown signal.
//!
//! Each long-lived loop observes the signal between iterations; the probe
//! supervisor additionally races its pending line-read against [`Shutdown::wait`]
//! so a blocking read cancels promptly. Triggering is sticky and idempotent.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Cooperative shutdown flag shared by all background tasks.
#[derive(Debug, Default)]
pub struct Shutdown {
    flag: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Wakes every task parked in [`Shutdown::wait`].
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if it already was.
    pub async fn wait(&self) {
        while !self.is_triggered() {
            let notified = self.notify.notified();
            // Re-check after registering so a trigger between the check and
            // the await cannot be missed.
            if self.is_triggered() {
                break;
            }
            notified.await;
        }
    }
}
