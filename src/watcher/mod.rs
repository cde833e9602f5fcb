// Watcher module - The supervision engine and its public API

mod callbacks;
pub mod dump;
mod engine;
mod exit;
mod monitor;
mod multi;
mod rate_limit;
mod registry;
mod resources;
mod restart;
mod signal;
mod watchdog;


pub use callbacks::{
    ErrorCallback, ExitCallback, MonitorCallback, MultiMonitorCallback, ProcessCreatedCallback,
    ProcessFilter, ResourceLimitCallback,
};
pub use rate_limit::{RateLimiter, DEFAULT_MAX_UPDATES_PER_SECOND};

use crate::config::{Cadence, MonitorConfig, Target, WatchConfig};
use crate::error::{Result, WatchError};
use crate::process::{
    Pid, ProcessController, ProcessInfo, ProcessInfoProvider, ProcessStats, ResourceLimits,
    SystemController, SystemProvider,
};
use engine::Shared;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long `restart_process` waits for a graceful exit
const RESTART_GRACE: Duration = Duration::from_secs(5);
/// How long `restart_process` waits after a forced kill
const KILL_GRACE: Duration = Duration::from_secs(1);
const EXIT_POLL: Duration = Duration::from_millis(100);

/// Process-supervision engine.
///
/// Registering the first process spawns six background loops (monitor,
/// multi-monitor, exit detector, resource monitor, auto-restart and
/// watchdog) that run until the registry empties or [`stop`](Self::stop) is
/// called. All methods take `&self` and may be called from any thread,
/// including from inside callbacks.
///
/// Failures are returned as `Err` and also reported through the `on_error`
/// callback, except `Rejected` which only means the process filter said no.
pub struct Watcher {
    shared: Arc<Shared>,
}

/// Registry entry taken out while a process is being restarted
struct Detached {
    info: ProcessInfo,
    config: Option<MonitorConfig>,
    restart_attempts: u32,
    was_primary: bool,
}

impl Watcher {
    /// Create an engine over the given collaborators with default settings
    pub fn new(
        provider: Arc<dyn ProcessInfoProvider>,
        controller: Arc<dyn ProcessController>,
    ) -> Self {
        Self::with_config(&WatchConfig::default(), provider, controller)
    }

    /// Create an engine using the defaults, cadences and rate limit of
    /// `config`. Targets are not registered; see [`watch_targets`](Self::watch_targets).
    pub fn with_config(
        config: &WatchConfig,
        provider: Arc<dyn ProcessInfoProvider>,
        controller: Arc<dyn ProcessController>,
    ) -> Self {
        Self::with_settings(
            config.defaults.clone(),
            config.cadence.clone(),
            config.max_updates_per_second,
            provider,
            controller,
        )
    }

    fn with_settings(
        defaults: MonitorConfig,
        cadence: Cadence,
        max_updates_per_second: u32,
        provider: Arc<dyn ProcessInfoProvider>,
        controller: Arc<dyn ProcessController>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(
                defaults,
                cadence,
                max_updates_per_second,
                provider,
                controller,
            )),
        }
    }

    /// Create an engine over the operating system's process table
    pub fn system() -> Self {
        Self::new(
            Arc::new(SystemProvider::new()),
            Arc::new(SystemController::new()),
        )
    }

    // Callback registration

    pub fn on_exit<F>(&self, callback: F) -> &Self
    where
        F: Fn(&ProcessInfo) + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .update(|c| c.on_exit = Some(Arc::new(callback)));
        self
    }

    /// Called with the primary process after every refresh. `interval`
    /// replaces the primary's update interval as the polling period.
    pub fn on_monitor_tick<F>(&self, callback: F, interval: Duration) -> &Self
    where
        F: Fn(&ProcessInfo) + Send + Sync + 'static,
    {
        self.shared.callbacks.update(|c| {
            c.on_monitor_tick = Some(Arc::new(callback));
            c.monitor_interval = Some(interval);
        });
        self.shared.wakeups.monitor.notify();
        self
    }

    pub fn on_multi_tick<F>(&self, callback: F) -> &Self
    where
        F: Fn(&[ProcessInfo]) + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .update(|c| c.on_multi_tick = Some(Arc::new(callback)));
        self
    }

    /// Called with a message and an errno-style code
    pub fn on_error<F>(&self, callback: F) -> &Self
    where
        F: Fn(&str, i32) + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .update(|c| c.on_error = Some(Arc::new(callback)));
        self
    }

    pub fn on_resource_limit_exceeded<F>(&self, callback: F) -> &Self
    where
        F: Fn(&ProcessInfo, &ResourceLimits) + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .update(|c| c.on_resource_limit_exceeded = Some(Arc::new(callback)));
        self
    }

    /// Called with the PID and command line of every process this engine
    /// launches, including auto-restarts
    pub fn on_process_created<F>(&self, callback: F) -> &Self
    where
        F: Fn(Pid, &str) + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .update(|c| c.on_process_created = Some(Arc::new(callback)));
        self
    }

    /// Candidates for which `filter` returns false are never registered
    pub fn set_process_filter<F>(&self, filter: F) -> &Self
    where
        F: Fn(&ProcessInfo) -> bool + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .update(|c| c.filter = Some(Arc::new(filter)));
        self
    }

    /// Replace the global config used by processes without an override
    pub fn set_default_config(&self, config: MonitorConfig) -> &Self {
        self.shared.registry().set_global(config);
        self
    }

    pub fn default_config(&self) -> MonitorConfig {
        self.shared.registry().global().clone()
    }

    /// Bound the number of refresh cycles per second (at least 1)
    pub fn set_rate_limiting(&self, max_updates_per_second: u32) -> &Self {
        self.shared.rate_limiter.set_max(max_updates_per_second);
        debug!(
            max_updates_per_second = self.shared.rate_limiter.max_per_second(),
            "Rate limit changed"
        );
        self
    }

    // Registration

    /// Monitor the first process whose name matches `name`
    ///
    /// # Arguments
    /// * `name` - Process name (prefix match)
    /// * `config` - Per-process override; `None` uses the global config
    ///
    /// # Returns
    /// * `Ok(Pid)` - The process is monitored (possibly already was)
    /// * `Err(WatchError::NotFound)` - No process matches `name`
    pub fn start(&self, name: &str, config: Option<MonitorConfig>) -> Result<Pid> {
        let result = self
            .shared
            .provider
            .find_pid_by_name(name)
            .ok_or_else(|| WatchError::NotFound(name.to_string()))
            .and_then(|pid| self.register(pid, config, None));
        self.reported(result)
    }

    /// Monitor `pid`
    ///
    /// # Returns
    /// * `Ok(Pid)` - The process is monitored (possibly already was)
    /// * `Err(WatchError::NotRunning)` - The process is not alive
    pub fn start_by_pid(&self, pid: Pid, config: Option<MonitorConfig>) -> Result<Pid> {
        let result = if self.is_monitoring(pid) || self.shared.provider.is_alive(pid) {
            self.register(pid, config, None)
        } else {
            Err(WatchError::NotRunning(pid))
        };
        self.reported(result)
    }

    /// Best-effort batch version of [`start`](Self::start). Each failure is
    /// reported through `on_error`; returns how many names ended up monitored.
    pub fn start_multiple<S: AsRef<str>>(&self, names: &[S], config: Option<MonitorConfig>) -> usize {
        names
            .iter()
            .filter(|name| self.start(name.as_ref(), config.clone()).is_ok())
            .count()
    }

    /// Register every target of a configuration file; returns how many
    /// ended up monitored
    pub fn watch_targets(&self, targets: &[Target]) -> usize {
        targets
            .iter()
            .filter(|target| {
                let result = match (&target.name, target.pid) {
                    (Some(name), _) => self.start(name, target.config.clone()),
                    (None, Some(pid)) => self.start_by_pid(pid, target.config.clone()),
                    (None, None) => return false,
                };
                result.is_ok()
            })
            .count()
    }

    fn register(
        &self,
        pid: Pid,
        config: Option<MonitorConfig>,
        command_line: Option<Vec<String>>,
    ) -> Result<Pid> {
        let shared = &self.shared;

        if shared.registry().contains(pid) {
            debug!(pid, "Process is already monitored");
            shared.ensure_running()?;
            return Ok(pid);
        }

        let mut info = match shared.provider.query(pid) {
            Some(info) if info.running => info,
            Some(_) => return Err(WatchError::NotRunning(pid)),
            None if shared.provider.is_alive(pid) => ProcessInfo::placeholder(pid, ""),
            None => return Err(WatchError::NotRunning(pid)),
        };
        if let Some(command_line) = command_line {
            info.command_line = command_line;
        }

        if !shared.callbacks.accepts(&info) {
            info!(pid, name = %info.name, "Process rejected by filter");
            return Err(WatchError::Rejected(pid));
        }

        let name = info.name.clone();
        let (inserted, monitored) = {
            let mut registry = shared.registry();
            let inserted = registry.insert(info, config, 0);
            (inserted, registry.len())
        };
        if inserted {
            info!(pid, name = %name, monitored, "Monitoring process");
        }

        shared.ensure_running()?;
        Ok(pid)
    }

    // Shutdown

    /// Stop every loop and forget every process. Blocks until the loop
    /// threads have exited; calling it again is a no-op.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Stop monitoring `pid`. Stops the engine if nothing is left.
    ///
    /// # Returns
    /// * `true` - The process was monitored and has been removed
    /// * `false` - The process was not monitored
    pub fn stop_process(&self, pid: Pid) -> bool {
        let (removed, idle) = {
            let mut registry = self.shared.registry();
            let removed = registry.remove(pid).is_some();
            (removed, registry.is_empty())
        };

        if removed {
            info!(pid, "Stopped monitoring process");
            let epoch = self.shared.epoch();
            if idle {
                self.shared.stop_if_idle(epoch);
                if !self.shared.is_live(epoch) {
                    self.shared.wait_for_loops(epoch);
                }
            }
        }

        removed
    }

    // Primary selection

    /// Make the process named `name` primary, registering it if needed
    pub fn switch_to_process(&self, name: &str) -> Result<Pid> {
        let result = self
            .shared
            .provider
            .find_pid_by_name(name)
            .ok_or_else(|| WatchError::NotFound(name.to_string()))
            .and_then(|pid| self.switch_to(pid));
        self.reported(result)
    }

    /// Make `pid` primary, registering it if needed
    pub fn switch_to_process_by_id(&self, pid: Pid) -> Result<Pid> {
        let result = self.switch_to(pid);
        self.reported(result)
    }

    fn switch_to(&self, pid: Pid) -> Result<Pid> {
        if !self.is_monitoring(pid) {
            if !self.shared.provider.is_alive(pid) {
                return Err(WatchError::NotRunning(pid));
            }
            self.register(pid, None, None)?;
        }

        if !self.shared.registry().set_primary(pid) {
            return Err(WatchError::NotMonitored(pid));
        }

        info!(pid, "Switched primary process");
        self.shared.wakeups.monitor.notify();
        Ok(pid)
    }

    // Queries

    /// Whether the background loops are running
    pub fn is_active(&self) -> bool {
        self.shared.is_running()
    }

    pub fn is_monitoring(&self, pid: Pid) -> bool {
        self.shared.registry().contains(pid)
    }

    /// Ask the provider whether `pid` is alive, monitored or not
    pub fn is_process_running(&self, pid: Pid) -> bool {
        self.shared.provider.is_alive(pid)
    }

    pub fn primary_pid(&self) -> Option<Pid> {
        self.shared.registry().primary()
    }

    pub fn monitored_pids(&self) -> Vec<Pid> {
        self.shared.registry().pids()
    }

    /// Cached snapshot if monitored, otherwise a fresh query
    pub fn process_info(&self, pid: Pid) -> Option<ProcessInfo> {
        let cached = self.shared.registry().get(pid).cloned();
        cached.or_else(|| self.shared.provider.query(pid))
    }

    pub fn pids_by_name(&self, name: &str) -> Vec<Pid> {
        self.shared.provider.find_all_pids_by_name(name)
    }

    pub fn child_processes(&self, pid: Pid) -> Vec<Pid> {
        self.shared.provider.list_children(pid)
    }

    /// Snapshot of every process on the system, monitored or not
    pub fn all_processes(&self) -> Vec<ProcessInfo> {
        self.shared.provider.list_all()
    }

    /// Processes above `threshold` percent CPU, busiest first
    pub fn high_cpu_processes(&self, threshold: f64) -> Vec<ProcessInfo> {
        let mut busy: Vec<ProcessInfo> = self
            .all_processes()
            .into_iter()
            .filter(|info| info.cpu_usage_percent > threshold)
            .collect();
        busy.sort_by(|a, b| b.cpu_usage_percent.total_cmp(&a.cpu_usage_percent));
        busy
    }

    /// Processes with more than `threshold_kb` resident, largest first
    pub fn high_memory_processes(&self, threshold_kb: u64) -> Vec<ProcessInfo> {
        let mut large: Vec<ProcessInfo> = self
            .all_processes()
            .into_iter()
            .filter(|info| info.memory_usage_kb > threshold_kb)
            .collect();
        large.sort_by(|a, b| b.memory_usage_kb.cmp(&a.memory_usage_kb));
        large
    }

    /// Per-process statistics of every monitored process
    pub fn monitoring_stats(&self) -> HashMap<Pid, ProcessStats> {
        self.shared.registry().stats()
    }

    /// How many times the watchdog restarted the loops
    pub fn watchdog_recoveries(&self) -> usize {
        self.shared.recoveries()
    }

    // Process control

    /// Launch `command` with `args`, optionally monitoring the new process
    pub fn launch_process(&self, command: &str, args: &[String], auto_monitor: bool) -> Result<Pid> {
        let result = self.launch(command, args, auto_monitor);
        self.reported(result)
    }

    fn launch(&self, command: &str, args: &[String], auto_monitor: bool) -> Result<Pid> {
        let mut command_line = Vec::with_capacity(args.len() + 1);
        command_line.push(command.to_string());
        command_line.extend_from_slice(args);

        let pid = self.shared.launch(&command_line)?.pid;
        info!(pid, command, "Launched process");

        if auto_monitor {
            self.register(pid, None, Some(command_line))?;
        }

        Ok(pid)
    }

    /// Signal `pid` to exit (SIGKILL when `force`). The exit itself is
    /// observed and reported by the loops.
    pub fn terminate_process(&self, pid: Pid, force: bool) -> Result<()> {
        let result = self.shared.controller.terminate(pid, force);
        if result.is_ok() {
            self.shared.wakeups.exit.notify();
        }
        self.reported(result)
    }

    /// Terminate `pid` and launch it again with the same command line. A
    /// monitored process keeps its config, restart count and primary role
    /// under the new PID, and no exit is reported for the old one.
    pub fn restart_process(&self, pid: Pid) -> Result<Pid> {
        let result = self.restart(pid);
        self.reported(result)
    }

    fn restart(&self, pid: Pid) -> Result<Pid> {
        let shared = &self.shared;

        let cached = shared
            .registry()
            .get(pid)
            .map(|info| info.command_line.clone())
            .filter(|command_line| !command_line.is_empty());
        let command_line = cached
            .or_else(|| shared.provider.query(pid).map(|info| info.command_line))
            .filter(|command_line| !command_line.is_empty())
            .ok_or(WatchError::QueryFailed(pid))?;

        // Out of the registry so the loops neither report nor relaunch it
        let detached = self.detach(pid);

        info!(pid, "Restarting process");
        if let Err(e) = self.terminate_and_wait(pid) {
            if let Some(detached) = detached {
                let info = detached.info.clone();
                self.reattach(detached, info)?;
            }
            return Err(e);
        }

        let info = match shared.launch(&command_line) {
            Ok(info) => info,
            Err(e) => {
                if let Some(detached) = detached {
                    self.restore_dead(detached)?;
                }
                return Err(e);
            }
        };
        let new_pid = info.pid;
        if let Some(detached) = detached {
            self.reattach(detached, info)?;
        }

        info!(old_pid = pid, pid = new_pid, "Process restarted");
        Ok(new_pid)
    }

    fn detach(&self, pid: Pid) -> Option<Detached> {
        let mut registry = self.shared.registry();
        let was_primary = registry.primary() == Some(pid);
        let config = registry.config_override(pid).cloned();
        let restart_attempts = registry.restart_attempts(pid);

        registry.remove(pid).map(|info| Detached {
            info,
            config,
            restart_attempts,
            was_primary,
        })
    }

    fn reattach(&self, detached: Detached, info: ProcessInfo) -> Result<()> {
        {
            let mut registry = self.shared.registry();
            let pid = info.pid;
            registry.insert(info, detached.config, detached.restart_attempts);
            if detached.was_primary {
                registry.set_primary(pid);
            }
        }
        self.shared.ensure_running()
    }

    /// Put back the entry of a process that was terminated but could not be
    /// launched again. It goes through the regular exit transition, so the
    /// exit is reported once and the auto-restart loop decides its fate.
    fn restore_dead(&self, detached: Detached) -> Result<()> {
        let pid = detached.info.pid;
        let exited = {
            let mut registry = self.shared.registry();
            registry.insert(detached.info, detached.config, detached.restart_attempts);
            if detached.was_primary {
                registry.set_primary(pid);
            }
            registry.mark_dead(pid)
        };

        if let Some(info) = exited {
            info!(pid, name = %info.name, "Process exited");
            self.shared.callbacks.exit(&info);
        }
        self.shared.ensure_running()?;
        self.shared.wakeups.restart.notify();
        Ok(())
    }

    /// SIGTERM, then SIGKILL if the process outlives the grace period
    fn terminate_and_wait(&self, pid: Pid) -> Result<()> {
        let controller = &self.shared.controller;

        controller.terminate(pid, false)?;
        if self.wait_for_exit(pid, RESTART_GRACE) {
            return Ok(());
        }

        warn!(pid, "Process did not exit within {:?}, killing it", RESTART_GRACE);
        controller.terminate(pid, true)?;
        if self.wait_for_exit(pid, KILL_GRACE) {
            return Ok(());
        }

        Err(WatchError::TerminateFailed {
            pid,
            reason: "process is still alive after SIGKILL".to_string(),
        })
    }

    fn wait_for_exit(&self, pid: Pid, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.shared.provider.is_alive(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(EXIT_POLL);
        }
    }

    // Per-process settings

    /// Replace the resource limits of a monitored process
    pub fn set_resource_limits(&self, pid: Pid, limits: ResourceLimits) -> Result<()> {
        let edited = self
            .shared
            .registry()
            .edit_config(pid, |config| config.resource_limits = limits);

        let result = if edited {
            info!(
                pid,
                max_cpu_percent = limits.max_cpu_percent,
                max_memory_kb = limits.max_memory_kb,
                "Resource limits updated"
            );
            self.shared.wakeups.resources.notify();
            Ok(())
        } else {
            Err(WatchError::NotMonitored(pid))
        };
        self.reported(result)
    }

    /// Set the nice value of `pid`
    pub fn set_process_priority(&self, pid: Pid, value: i32) -> Result<()> {
        let result = self.shared.controller.set_priority(pid, value);
        if result.is_ok() {
            self.shared.registry().update_priority(pid, value);
            info!(pid, priority = value, "Process priority changed");
        }
        self.reported(result)
    }

    /// Enable or disable auto-restart for a monitored process. Resets its
    /// restart attempt counter.
    pub fn configure_auto_restart(&self, pid: Pid, enable: bool, max_attempts: u32) -> Result<()> {
        let edited = {
            let mut registry = self.shared.registry();
            let edited = registry.edit_config(pid, |config| {
                config.auto_restart = enable;
                config.max_restart_attempts = max_attempts;
            });
            if edited {
                registry.set_restart_attempts(pid, 0);
            }
            edited
        };

        let result = if edited {
            info!(pid, enable, max_attempts, "Auto-restart configured");
            Ok(())
        } else {
            Err(WatchError::NotMonitored(pid))
        };
        self.reported(result)
    }

    // Diagnostics

    /// Render a text dump of `pid`, writing it to `output` if given and
    /// logging it otherwise
    pub fn dump_process_info(&self, pid: Pid, detailed: bool, output: Option<&Path>) -> Result<String> {
        let result = self.dump(pid, detailed, output);
        self.reported(result)
    }

    fn dump(&self, pid: Pid, detailed: bool, output: Option<&Path>) -> Result<String> {
        let info = self
            .process_info(pid)
            .ok_or(WatchError::QueryFailed(pid))?;
        let config = {
            let registry = self.shared.registry();
            registry
                .contains(pid)
                .then(|| registry.effective_config(pid))
        };
        let children = if detailed {
            self.shared.provider.list_children(pid)
        } else {
            Vec::new()
        };

        let text = dump::render(&info, detailed, config.as_ref(), &children);

        match output {
            Some(path) => {
                std::fs::write(path, &text)?;
                info!(pid, path = %path.display(), "Process dump written");
            }
            None => info!("{}", text),
        }

        Ok(text)
    }

    /// Report a failed public call through `on_error`
    fn reported<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if !matches!(e, WatchError::Rejected(_)) {
                warn!("{}", e);
                self.shared.callbacks.report(e);
            }
        }
        result
    }

    #[cfg(test)]
    fn shared(&self) -> &Shared {
        &self.shared
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.shared.stop();
    }
}
