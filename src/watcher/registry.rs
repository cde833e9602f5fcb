use crate::config::MonitorConfig;
use crate::process::{Pid, ProcessInfo, ProcessStats};
use std::collections::HashMap;

/// Result of committing a fresh snapshot to the registry
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Refresh {
    /// The process is still running; carries the committed snapshot
    Updated(ProcessInfo),
    /// This commit flipped the entry from running to dead. Exactly one
    /// caller ever sees this for a given entry.
    Exited(ProcessInfo),
    /// The entry is gone or was already dead; nothing to dispatch
    Stale,
}

/// Everything the engine knows about its monitored processes.
///
/// The four per-PID maps are only changed through whole-entry operations,
/// so a PID is present in all of them or in none.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    processes: HashMap<Pid, ProcessInfo>,
    /// Per-PID overrides; a missing entry means the global config applies
    configs: HashMap<Pid, MonitorConfig>,
    restart_attempts: HashMap<Pid, u32>,
    stats: HashMap<Pid, ProcessStats>,
    primary: Option<Pid>,
    global: MonitorConfig,
}

impl Registry {
    pub fn new(global: MonitorConfig) -> Self {
        Self {
            global,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&ProcessInfo> {
        self.processes.get(&pid)
    }

    /// All monitored PIDs in ascending order
    pub fn pids(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.processes.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn running_pids(&self) -> Vec<Pid> {
        self.filtered_pids(|info| info.running)
    }

    pub fn dead_pids(&self) -> Vec<Pid> {
        self.filtered_pids(|info| !info.running)
    }

    fn filtered_pids(&self, keep: impl Fn(&ProcessInfo) -> bool) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self
            .processes
            .values()
            .filter(|info| keep(info))
            .map(|info| info.pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    pub fn primary(&self) -> Option<Pid> {
        self.primary
    }

    /// Make `pid` primary. Returns false if it is not monitored.
    pub fn set_primary(&mut self, pid: Pid) -> bool {
        if !self.contains(pid) {
            return false;
        }
        self.primary = Some(pid);
        true
    }

    /// Pick a new primary: the lowest running PID, else the lowest PID
    fn reassign_primary(&mut self) {
        self.primary = self
            .running_pids()
            .first()
            .copied()
            .or_else(|| self.pids().first().copied());
    }

    pub fn global(&self) -> &MonitorConfig {
        &self.global
    }

    pub fn set_global(&mut self, config: MonitorConfig) {
        self.global = config;
    }

    pub fn config_override(&self, pid: Pid) -> Option<&MonitorConfig> {
        self.configs.get(&pid)
    }

    /// The override for `pid` if one exists, else the global config
    pub fn effective_config(&self, pid: Pid) -> MonitorConfig {
        self.configs
            .get(&pid)
            .cloned()
            .unwrap_or_else(|| self.global.clone())
    }

    /// Edit the config of a monitored PID. Without an override the global
    /// config is copied first, so only the edited field changes.
    pub fn edit_config(&mut self, pid: Pid, edit: impl FnOnce(&mut MonitorConfig)) -> bool {
        if !self.contains(pid) {
            return false;
        }

        let mut config = self.effective_config(pid);
        edit(&mut config);
        self.configs.insert(pid, config);
        true
    }

    pub fn restart_attempts(&self, pid: Pid) -> u32 {
        self.restart_attempts.get(&pid).copied().unwrap_or(0)
    }

    pub fn set_restart_attempts(&mut self, pid: Pid, attempts: u32) {
        if let Some(slot) = self.restart_attempts.get_mut(&pid) {
            *slot = attempts;
        }
    }

    /// Add a new entry. The first entry becomes primary.
    ///
    /// # Returns
    /// * `true` - The entry was added
    /// * `false` - The PID is already monitored, nothing changed
    pub fn insert(
        &mut self,
        info: ProcessInfo,
        config: Option<MonitorConfig>,
        restart_attempts: u32,
    ) -> bool {
        let pid = info.pid;
        if self.contains(pid) {
            return false;
        }

        self.processes.insert(pid, info);
        if let Some(config) = config {
            self.configs.insert(pid, config);
        }
        self.restart_attempts.insert(pid, restart_attempts);
        self.stats.insert(pid, ProcessStats::default());

        if self.primary.is_none() {
            self.primary = Some(pid);
        }

        true
    }

    /// Remove an entry from every map, reassigning primary if needed
    pub fn remove(&mut self, pid: Pid) -> Option<ProcessInfo> {
        let info = self.processes.remove(&pid)?;
        self.configs.remove(&pid);
        self.restart_attempts.remove(&pid);
        self.stats.remove(&pid);

        if self.primary == Some(pid) {
            self.reassign_primary();
        }

        Some(info)
    }

    /// Replace the entry of `old` with a relaunched process. The config
    /// override, restart attempt count and primary role move to the new PID.
    pub fn move_entry(&mut self, old: Pid, info: ProcessInfo) -> bool {
        if !self.contains(old) || self.contains(info.pid) {
            return false;
        }

        let new = info.pid;
        let was_primary = self.primary == Some(old);
        let config = self.configs.get(&old).cloned();
        let attempts = self.restart_attempts(old);

        self.remove(old);
        self.insert(info, config, attempts);

        if was_primary {
            self.primary = Some(new);
        }

        true
    }

    /// Store a fresh snapshot of a running entry
    pub fn commit(&mut self, mut info: ProcessInfo) -> Refresh {
        let pid = info.pid;
        let Some(entry) = self.processes.get_mut(&pid) else {
            return Refresh::Stale;
        };
        if !entry.running {
            return Refresh::Stale;
        }

        if !info.running {
            info.mark_dead();
            *entry = info.clone();
            if self.primary == Some(pid) {
                self.reassign_primary();
            }
            return Refresh::Exited(info);
        }

        *entry = info.clone();
        self.stats.entry(pid).or_default().record_sample(&info);
        Refresh::Updated(info)
    }

    /// Flip a running entry to dead
    ///
    /// # Returns
    /// * `Some(ProcessInfo)` - This call performed the transition
    /// * `None` - Not monitored, or already dead
    pub fn mark_dead(&mut self, pid: Pid) -> Option<ProcessInfo> {
        let entry = self.processes.get_mut(&pid)?;
        if !entry.running {
            return None;
        }

        entry.mark_dead();
        let info = entry.clone();

        if self.primary == Some(pid) {
            self.reassign_primary();
        }

        Some(info)
    }

    pub fn update_priority(&mut self, pid: Pid, priority: i32) {
        if let Some(entry) = self.processes.get_mut(&pid) {
            entry.priority = priority;
        }
    }

    pub fn stats_mut(&mut self, pid: Pid) -> Option<&mut ProcessStats> {
        self.stats.get_mut(&pid)
    }

    pub fn stats(&self) -> HashMap<Pid, ProcessStats> {
        self.stats.clone()
    }

    pub fn clear(&mut self) {
        self.processes.clear();
        self.configs.clear();
        self.restart_attempts.clear();
        self.stats.clear();
        self.primary = None;
    }

    /// Whether the four maps agree on their keys
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        self.configs.keys().all(|pid| self.contains(*pid))
            && self.restart_attempts.len() == self.processes.len()
            && self.restart_attempts.keys().all(|pid| self.contains(*pid))
            && self.stats.len() == self.processes.len()
            && self.primary.map_or(self.is_empty(), |pid| self.contains(pid))
    }
}
