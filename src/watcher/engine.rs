use super::callbacks::Dispatcher;
use super::rate_limit::RateLimiter;
use super::registry::{Refresh, Registry};
use super::signal::{Heartbeat, LoopCount, Wakeups};
use super::{exit, monitor, multi, resources, restart, watchdog};
use crate::config::{Cadence, MonitorConfig};
use crate::error::{Result, WatchError};
use crate::perf::SLOW_CALL_MS;
use crate::process::{Pid, ProcessController, ProcessInfo, ProcessInfoProvider};
use std::cell::Cell;
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

type LoopFn = fn(Arc<Shared>, u64);

/// The five operational loops supervised by the watchdog
const WORKERS: [(&str, LoopFn); 5] = [
    ("pidwatch-monitor", monitor::run),
    ("pidwatch-multi", multi::run),
    ("pidwatch-exit", exit::run),
    ("pidwatch-resources", resources::run),
    ("pidwatch-restart", restart::run),
];

const JOIN_POLL: Duration = Duration::from_millis(10);

thread_local! {
    /// Address of the engine whose loop runs on this thread, 0 elsewhere
    static LOOP_ENGINE: Cell<usize> = Cell::new(0);
}

/// Thread handles of the current session, plus those of earlier sessions
/// that have not been joined yet
#[derive(Default)]
struct Lifecycle {
    workers: Vec<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
    retired: Vec<JoinHandle<()>>,
}

impl Lifecycle {
    /// Move the current session's handles to `retired`
    fn retire(&mut self) {
        let workers = std::mem::take(&mut self.workers);
        self.retired.extend(workers);
        self.retired.extend(self.watchdog.take());
        self.reap();
    }

    /// Join the retired threads that have already finished
    fn reap(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retired)
            .into_iter()
            .partition(|handle| handle.is_finished());
        self.retired = running;
        for handle in finished {
            if handle.join().is_err() {
                error!("Supervision loop panicked");
            }
        }
    }
}

/// Keeps the live loop count accurate even if a loop panics
struct LoopGuard(Arc<Shared>);

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.loops.leave();
    }
}

/// Outcome of a watchdog recovery attempt
#[derive(Debug, PartialEq)]
pub(crate) enum Recovery {
    /// Loops were respawned under the new session epoch
    Resumed(u64),
    /// The engine was stopped while the watchdog waited, or nothing is left
    /// to monitor
    Stopped,
    Failed(String),
}

/// State shared by the public handle and every loop thread.
///
/// Lock order is lifecycle before registry. Loops only ever take the
/// registry lock, and never across a provider or controller call or a
/// callback.
pub(crate) struct Shared {
    registry: Mutex<Registry>,
    running: AtomicBool,
    /// Bumped every time a set of loops is spawned. A loop whose epoch is
    /// stale exits even if the engine is running again.
    epoch: AtomicU64,
    pub heartbeat: Heartbeat,
    pub wakeups: Wakeups,
    pub callbacks: Dispatcher,
    pub rate_limiter: RateLimiter,
    pub provider: Arc<dyn ProcessInfoProvider>,
    pub controller: Arc<dyn ProcessController>,
    pub cadence: Cadence,
    lifecycle: Mutex<Lifecycle>,
    loops: LoopCount,
    recoveries: AtomicUsize,
}

impl Shared {
    pub fn new(
        global: MonitorConfig,
        cadence: Cadence,
        max_updates_per_second: u32,
        provider: Arc<dyn ProcessInfoProvider>,
        controller: Arc<dyn ProcessController>,
    ) -> Self {
        Self {
            registry: Mutex::new(Registry::new(global)),
            running: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            heartbeat: Heartbeat::default(),
            wakeups: Wakeups::default(),
            callbacks: Dispatcher::default(),
            rate_limiter: RateLimiter::new(max_updates_per_second),
            provider,
            controller,
            cadence,
            lifecycle: Mutex::new(Lifecycle::default()),
            loops: LoopCount::default(),
            recoveries: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Whether a loop spawned for `epoch` should keep going
    pub fn is_live(&self, epoch: u64) -> bool {
        self.is_running() && self.epoch() == epoch
    }

    pub fn recoveries(&self) -> usize {
        self.recoveries.load(Ordering::SeqCst)
    }

    /// Loop threads of this engine that are still alive, any session
    #[cfg(test)]
    pub fn live_loops(&self) -> usize {
        self.loops.alive()
    }

    fn on_loop_thread(&self) -> bool {
        LOOP_ENGINE.with(|engine| engine.get() == self as *const Self as usize)
    }

    /// Spawn the six loops if the engine is idle and has work, otherwise
    /// nudge the running loops so new entries are picked up promptly.
    pub fn ensure_running(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle();

        if self.is_running() {
            self.wakeups.notify_workers();
            return Ok(());
        }
        if self.registry().is_empty() {
            return Ok(());
        }

        // Loops of an earlier session may still be winding down
        lifecycle.retire();

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.heartbeat.reset();
        self.running.store(true, Ordering::SeqCst);

        let spawned = self.spawn_workers(&mut lifecycle, epoch).and_then(|()| {
            let handle = self.spawn_loop("pidwatch-watchdog", watchdog::run, epoch)?;
            lifecycle.watchdog = Some(handle);
            Ok(())
        });

        match spawned {
            Ok(()) => {
                info!(epoch, "Supervision loops started");
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn supervision loops: {}", e);
                self.running.store(false, Ordering::SeqCst);
                self.wakeups.notify_all();
                Err(WatchError::Io(e))
            }
        }
    }

    fn spawn_loop(
        self: &Arc<Self>,
        name: &str,
        body: LoopFn,
        epoch: u64,
    ) -> io::Result<JoinHandle<()>> {
        let shared = Arc::clone(self);
        self.loops.enter();

        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            LOOP_ENGINE.with(|engine| engine.set(Arc::as_ptr(&shared) as usize));
            let _alive = LoopGuard(Arc::clone(&shared));
            body(shared, epoch)
        });
        if spawned.is_err() {
            self.loops.leave();
        }
        spawned
    }

    fn spawn_workers(
        self: &Arc<Self>,
        lifecycle: &mut Lifecycle,
        epoch: u64,
    ) -> io::Result<()> {
        for (name, body) in WORKERS {
            let handle = self.spawn_loop(name, body, epoch)?;
            lifecycle.workers.push(handle);
        }
        Ok(())
    }

    /// Stop every loop and forget every process. Returns once every loop
    /// thread has exited, other than a calling loop thread. Safe to call
    /// repeatedly and from a loop thread (a callback may stop the engine).
    pub fn stop(&self) {
        let epoch = {
            let mut lifecycle = self.lifecycle();
            let was_running = self.running.swap(false, Ordering::SeqCst);
            self.wakeups.notify_all();
            self.registry().clear();
            if was_running {
                info!("Stopping supervision loops");
            }
            lifecycle.retire();
            self.epoch()
        };

        self.wait_for_loops(epoch);
    }

    /// Stop the session `epoch` if the registry is empty. Unlike `stop` this
    /// never drops an entry that a concurrent registration just added, and
    /// it does not wait for the loops.
    pub fn stop_if_idle(&self, epoch: u64) {
        let mut lifecycle = self.lifecycle();
        if !self.is_live(epoch) {
            return;
        }
        {
            let registry = self.registry();
            if !registry.is_empty() {
                return;
            }
            self.running.store(false, Ordering::SeqCst);
        }
        self.wakeups.notify_all();
        info!("No processes left to monitor, stopping");
        lifecycle.retire();
    }

    /// Block until the loops of the session that ended at `epoch` are gone.
    /// Returns early if a new session starts meanwhile.
    pub fn wait_for_loops(&self, epoch: u64) {
        self.loops
            .wait_idle(self.on_loop_thread(), || self.epoch() != epoch);
        self.lifecycle().reap();
    }

    /// Tear down and respawn the operational loops of session `epoch`.
    ///
    /// The workers are retired by moving to a new epoch while the engine
    /// keeps running, so registrations during recovery only nudge the
    /// loops. The lifecycle lock is not held while joining.
    pub fn recover(self: &Arc<Self>, epoch: u64) -> Recovery {
        let (next, workers) = {
            let mut lifecycle = self.lifecycle();
            if !self.is_live(epoch) {
                return Recovery::Stopped;
            }

            warn!("Supervision loops stopped reporting progress, restarting them");
            let next = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            self.wakeups.notify_workers();
            (next, std::mem::take(&mut lifecycle.workers))
        };

        let grace = self.cadence.join_grace();
        let stragglers = join_within(workers, grace);

        let mut lifecycle = self.lifecycle();
        let straggling = stragglers.len();
        // Stragglers belong to a dead epoch and exit on their own once
        // unblocked
        lifecycle.retired.extend(stragglers);

        if !self.is_live(next) {
            return Recovery::Stopped;
        }
        if self.registry().is_empty() {
            info!("No processes left to monitor after recovery, stopping");
            self.running.store(false, Ordering::SeqCst);
            self.wakeups.notify_all();
            return Recovery::Stopped;
        }

        let reason = if straggling > 0 {
            format!("{} loop(s) did not stop within {:?}", straggling, grace)
        } else {
            self.heartbeat.reset();
            match self.spawn_workers(&mut lifecycle, next) {
                Ok(()) => {
                    let total = self.recoveries.fetch_add(1, Ordering::SeqCst) + 1;
                    info!(epoch = next, recoveries = total, "Supervision loops restarted");
                    return Recovery::Resumed(next);
                }
                Err(e) => format!("failed to respawn loops: {}", e),
            }
        };

        self.running.store(false, Ordering::SeqCst);
        self.wakeups.notify_all();
        self.registry().clear();
        Recovery::Failed(reason)
    }

    /// Query `pid` and commit the snapshot
    pub fn refresh(&self, pid: Pid) -> Refresh {
        let queried = {
            let _timer = crate::perf_time!("provider.query", SLOW_CALL_MS);
            self.provider.query(pid)
        };

        match queried {
            Some(info) => self.registry().commit(info),
            None if self.provider.is_alive(pid) => {
                warn!(pid, "Failed to query process");
                self.callbacks.report(&WatchError::QueryFailed(pid));
                Refresh::Stale
            }
            None => {
                let exited = self.registry().mark_dead(pid);
                exited.map_or(Refresh::Stale, Refresh::Exited)
            }
        }
    }

    /// Register every descendant of `root` that is not monitored yet, with
    /// the config of `root`. Runs outside the registry lock except for the
    /// individual inserts.
    pub fn cascade_children(&self, root: Pid, config: &MonitorConfig) {
        let mut visited = HashSet::from([root]);
        let mut pending = vec![root];

        while let Some(parent) = pending.pop() {
            for child in self.provider.list_children(parent) {
                if !visited.insert(child) {
                    continue;
                }
                pending.push(child);

                if self.registry().contains(child) {
                    continue;
                }
                let Some(info) = self.provider.query(child) else {
                    continue;
                };
                if !info.running || !self.callbacks.accepts(&info) {
                    continue;
                }

                let mut registry = self.registry();
                if !registry.contains(root) {
                    return;
                }
                if registry.insert(info, Some(config.clone()), 0) {
                    info!(pid = child, parent, "Monitoring child process");
                }
            }
        }
    }

    /// Spawn `command_line` and fire `on_process_created`. The returned
    /// snapshot carries `command_line` so the process can be relaunched
    /// again later.
    pub fn launch(&self, command_line: &[String]) -> Result<ProcessInfo> {
        let (program, args) = command_line
            .split_first()
            .ok_or_else(|| WatchError::LaunchFailed {
                command: String::new(),
                reason: "empty command line".to_string(),
            })?;

        let pid = {
            let _timer = crate::perf_time!("controller.spawn", SLOW_CALL_MS);
            self.controller.spawn(program, args)?
        };

        let mut info = self
            .provider
            .query(pid)
            .unwrap_or_else(|| ProcessInfo::placeholder(pid, program_name(program)));
        info.command_line = command_line.to_vec();

        self.callbacks.process_created(pid, &command_line.join(" "));
        Ok(info)
    }
}

/// Join what finishes within `grace`; returns the threads that did not
fn join_within(handles: Vec<JoinHandle<()>>, grace: Duration) -> Vec<JoinHandle<()>> {
    let deadline = Instant::now() + grace;
    let mut pending = handles;

    loop {
        let (finished, rest): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|handle| handle.is_finished());
        for handle in finished {
            if handle.join().is_err() {
                error!("Supervision loop panicked");
            }
        }

        pending = rest;
        if pending.is_empty() || Instant::now() >= deadline {
            return pending;
        }
        thread::sleep(JOIN_POLL);
    }
}

fn program_name(program: &str) -> String {
    std::path::Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}
