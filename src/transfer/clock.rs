use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shared flag set by the coordinator to stop the active job. Cloning shares
/// the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Result of waiting out a backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Interrupted,
}

/// Source of the retry delay. The queue only ever sleeps through this trait.
pub trait Clock: Send + Sync {
    /// Wait for `delay` unless `cancel` fires first.
    fn wait(&self, delay: Duration, cancel: &CancelToken) -> WaitOutcome;
}

/// Sleeps in short slices so cancel/skip interrupt a pending retry quickly.
#[derive(Debug, Clone)]
pub struct RealClock {
    slice: Duration,
}

impl Default for RealClock {
    fn default() -> Self {
        Self { slice: Duration::from_millis(100) }
    }
}

impl RealClock {
    pub fn with_slice(slice: Duration) -> Self {
        Self { slice: slice.max(Duration::from_millis(1)) }
    }
}

impl Clock for RealClock {
    fn wait(&self, delay: Duration, cancel: &CancelToken) -> WaitOutcome {
        let deadline = Instant::now() + delay;
        loop {
            if cancel.is_cancelled() {
                return WaitOutcome::Interrupted;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::Elapsed;
            }
            std::thread::sleep(std::cmp::min(self.slice, deadline - now));
        }
    }
}
