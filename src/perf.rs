// Performance utilities for spotting slow collaborator calls

use std::time::{Duration, Instant};

/// Threshold for a single process-table query or control call
pub const SLOW_CALL_MS: u64 = 250;

/// Simple performance timer for measuring operation duration
pub struct PerfTimer {
    name: &'static str,
    start: Instant,
    threshold: Option<Duration>,
    finished: bool,
}

impl PerfTimer {
    /// Create a new performance timer
    ///
    /// # Arguments
    /// * `name` - Name of the operation being timed
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
            threshold: None,
            finished: false,
        }
    }

    /// Create a timer that warns when dropped after exceeding a threshold
    ///
    /// # Arguments
    /// * `name` - Name of the operation being timed
    /// * `threshold_ms` - Warn if the operation takes at least this long
    pub fn with_threshold(name: &'static str, threshold_ms: u64) -> Self {
        Self {
            name,
            start: Instant::now(),
            threshold: Some(Duration::from_millis(threshold_ms)),
            finished: false,
        }
    }

    /// Get elapsed time without stopping the timer
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn is_slow(&self, elapsed: Duration) -> bool {
        self.threshold.is_some_and(|threshold| elapsed >= threshold)
    }

    /// Stop the timer, log the duration at debug level and return it
    pub fn stop(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        self.finished = true;

        tracing::debug!(
            target: "perf",
            operation = self.name,
            duration_ms = elapsed.as_millis() as u64,
            slow = self.is_slow(elapsed),
            "Operation completed"
        );

        elapsed
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let elapsed = self.start.elapsed();
        if self.is_slow(elapsed) {
            tracing::warn!(
                target: "perf",
                operation = self.name,
                duration_ms = elapsed.as_millis() as u64,
                "Slow operation detected"
            );
        }
    }
}

/// Macro for easy performance timing
#[macro_export]
macro_rules! perf_time {
    ($name:expr) => {
        $crate::perf::PerfTimer::new($name)
    };
    ($name:expr, $threshold_ms:expr) => {
        $crate::perf::PerfTimer::with_threshold($name, $threshold_ms)
    };
}
