use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Default number of refresh cycles allowed per second
pub const DEFAULT_MAX_UPDATES_PER_SECOND: u32 = 10;

#[derive(Debug)]
struct Window {
    start: Instant,
    count: u32,
}

/// Caps the number of full refresh cycles per wall-clock second, shared by
/// every loop that polls the process table. A throttled caller skips its
/// work for that tick instead of blocking.
#[derive(Debug)]
pub struct RateLimiter {
    window: Mutex<Window>,
    max_per_second: AtomicU32,
}

impl RateLimiter {
    pub fn new(max_per_second: u32) -> Self {
        Self {
            window: Mutex::new(Window {
                start: Instant::now(),
                count: 0,
            }),
            max_per_second: AtomicU32::new(max_per_second.max(1)),
        }
    }

    pub fn max_per_second(&self) -> u32 {
        self.max_per_second.load(Ordering::Relaxed)
    }

    /// Change the bound; values below 1 are clamped to 1
    pub fn set_max(&self, max_per_second: u32) {
        self.max_per_second
            .store(max_per_second.max(1), Ordering::Relaxed);
    }

    /// Consume one slot of the current window
    ///
    /// # Returns
    /// * `true` - The caller may run its refresh cycle
    /// * `false` - Throttled, skip this tick
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Same as [`try_acquire`](Self::try_acquire) with an explicit clock
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let max = self.max_per_second();
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);

        if now.saturating_duration_since(window.start) >= WINDOW {
            window.start = now;
            window.count = 1;
            return true;
        }

        if window.count < max {
            window.count += 1;
            true
        } else {
            false
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UPDATES_PER_SECOND)
    }
}
