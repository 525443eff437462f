use std::sync::atomic::{AtomicU64, Ordering};

/// Receiver for the app-icon unread badge
///
/// Called from spawned tasks only, never on the caller's task.
pub trait BadgeSink: Send + Sync {
    fn set_unread_count(&self, count: u64);
}

/// Badge sink for headless runs: logs the count and remembers the last value
#[derive(Debug, Default)]
pub struct LogBadgeSink {
    last: AtomicU64,
}

impl LogBadgeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_count(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

impl BadgeSink for LogBadgeSink {
    fn set_unread_count(&self, count: u64) {
        let previous = self.last.swap(count, Ordering::Relaxed);
        if previous != count {
            tracing::info!(unread = count, "Badge count updated");
        }
    }
}
