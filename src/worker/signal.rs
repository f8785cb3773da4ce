//! Cooperative stop signal shared by the scanner and consumer loops

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Longest uninterrupted sleep while waiting on a stop signal
const STOP_CHECK_SLICE: Duration = Duration::from_secs(1);

/// Cooperative cancellation flag shared by every loop of the system.
///
/// `stop()` is idempotent; clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the signal. Returns true on the first call only.
    pub fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking at least once per second to check the
    /// flag. Returns true if the signal tripped.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let mut remaining = duration;

        while !remaining.is_zero() {
            if self.is_stopped() {
                return true;
            }
            let slice = remaining.min(STOP_CHECK_SLICE);
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }

        self.is_stopped()
    }
}
