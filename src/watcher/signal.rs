use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Interruptible sleep for one loop.
///
/// A notification that arrives while the loop is busy is remembered, so the
/// next `wait` returns at once instead of sleeping through it.
#[derive(Debug, Default)]
pub(crate) struct Wakeup {
    pending: Mutex<bool>,
    cv: Condvar,
}

impl Wakeup {
    pub fn notify(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.cv.notify_all();
    }

    /// Sleep for up to `timeout`. Returns whether the sleep was cut short.
    pub fn wait(&self, timeout: Duration) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut pending, _) = self
            .cv
            .wait_timeout_while(pending, timeout, |pending| !*pending)
            .unwrap_or_else(PoisonError::into_inner);

        std::mem::replace(&mut *pending, false)
    }
}

/// One wakeup per background loop
#[derive(Debug, Default)]
pub(crate) struct Wakeups {
    pub monitor: Wakeup,
    pub multi: Wakeup,
    pub exit: Wakeup,
    pub resources: Wakeup,
    pub restart: Wakeup,
    pub watchdog: Wakeup,
}

impl Wakeups {
    /// Wake the five operational loops
    pub fn notify_workers(&self) {
        self.monitor.notify();
        self.multi.notify();
        self.exit.notify();
        self.resources.notify();
        self.restart.notify();
    }

    pub fn notify_all(&self) {
        self.notify_workers();
        self.watchdog.notify();
    }
}

/// Progress flag set by the operational loops and cleared by the watchdog.
/// Lives outside the registry lock so a loop stuck holding that lock cannot
/// keep the watchdog from noticing.
#[derive(Debug, Default)]
pub(crate) struct Heartbeat {
    healthy: AtomicBool,
    #[cfg(test)]
    muted: AtomicBool,
}

impl Heartbeat {
    /// Report one completed loop iteration
    pub fn beat(&self) {
        #[cfg(test)]
        if self.muted.load(Ordering::Acquire) {
            return;
        }

        self.healthy.store(true, Ordering::Release);
    }

    /// Read and clear the flag
    pub fn take(&self) -> bool {
        self.healthy.swap(false, Ordering::AcqRel)
    }

    pub fn reset(&self) {
        self.healthy.store(false, Ordering::Release);
    }

    /// Drop every beat until unmuted, simulating stuck loops
    #[cfg(test)]
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }
}

/// Loop threads of one engine that have not finished yet.
///
/// `stop` waits on this rather than on join handles alone, since another
/// caller may already hold the handles. Loop threads that call `stop` from
/// a callback count as `stopping` and are not waited for.
#[derive(Debug, Default)]
pub(crate) struct LoopCount {
    state: Mutex<LoopState>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct LoopState {
    alive: usize,
    stopping: usize,
}

impl LoopCount {
    fn state(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enter(&self) {
        self.state().alive += 1;
        self.changed.notify_all();
    }

    pub fn leave(&self) {
        let mut state = self.state();
        state.alive = state.alive.saturating_sub(1);
        self.changed.notify_all();
    }

    #[cfg(test)]
    pub fn alive(&self) -> usize {
        self.state().alive
    }

    /// Block until every loop thread other than the stopping ones has
    /// exited, or until `superseded` turns true. `from_loop` marks the
    /// caller as a loop thread of this engine.
    pub fn wait_idle(&self, from_loop: bool, superseded: impl Fn() -> bool) {
        let mut state = self.state();
        if from_loop {
            state.stopping += 1;
            self.changed.notify_all();
        }

        let mut state = self
            .changed
            .wait_while(state, |state| state.alive > state.stopping && !superseded())
            .unwrap_or_else(PoisonError::into_inner);

        if from_loop {
            state.stopping = state.stopping.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_times_out() {
        let wakeup = Wakeup::default();
        let start = Instant::now();

        assert!(!wakeup.wait(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_notify_before_wait_is_not_lost() {
        let wakeup = Wakeup::default();
        wakeup.notify();

        let start = Instant::now();
        assert!(wakeup.wait(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));

        // Consumed by the first wait
        assert!(!wakeup.wait(Duration::from_millis(10)));
    }

    #[test]
    fn test_notify_wakes_sleeping_thread() {
        let wakeup = Arc::new(Wakeup::default());
        let sleeper = {
            let wakeup = Arc::clone(&wakeup);
            thread::spawn(move || {
                let start = Instant::now();
                wakeup.wait(Duration::from_secs(10));
                start.elapsed()
            })
        };

        thread::sleep(Duration::from_millis(50));
        wakeup.notify();

        let slept = sleeper.join().unwrap();
        assert!(slept < Duration::from_secs(5));
    }

    #[test]
    fn test_heartbeat_take_clears() {
        let heartbeat = Heartbeat::default();
        assert!(!heartbeat.take());

        heartbeat.beat();
        assert!(heartbeat.take());
        assert!(!heartbeat.take());
    }

    #[test]
    fn test_muted_heartbeat() {
        let heartbeat = Heartbeat::default();
        heartbeat.set_muted(true);
        heartbeat.beat();
        assert!(!heartbeat.take());

        heartbeat.set_muted(false);
        heartbeat.beat();
        assert!(heartbeat.take());
    }

    #[test]
    fn test_wait_idle_waits_for_loops() {
        let loops = Arc::new(LoopCount::default());
        loops.enter();
        let worker = {
            let loops = Arc::clone(&loops);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                loops.leave();
            })
        };

        let start = Instant::now();
        loops.wait_idle(false, || false);
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(loops.alive(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn test_stopping_loops_do_not_wait_for_each_other() {
        let loops = Arc::new(LoopCount::default());
        loops.enter();
        loops.enter();

        let stoppers: Vec<_> = (0..2)
            .map(|_| {
                let loops = Arc::clone(&loops);
                thread::spawn(move || {
                    loops.wait_idle(true, || false);
                    loops.leave();
                })
            })
            .collect();

        for stopper in stoppers {
            stopper.join().unwrap();
        }
        assert_eq!(loops.alive(), 0);
    }

    #[test]
    fn test_wait_idle_returns_when_superseded() {
        let loops = LoopCount::default();
        loops.enter();

        loops.wait_idle(false, || true);
        assert_eq!(loops.alive(), 1);
    }
}
