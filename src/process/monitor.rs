use crate::process::{IoStats, Pid, ProcessInfo, ProcessInfoProvider, ProcessStatus};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, UNIX_EPOCH};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, Users};

/// Previous I/O counters of one process, used to derive byte rates
#[derive(Debug, Clone, Copy)]
struct SampleState {
    read_bytes: u64,
    write_bytes: u64,
    at: Instant,
}

/// Process information provider backed by `sysinfo`
///
/// CPU usage is computed by sysinfo from the previous refresh held in this
/// instance's `System`, so the first query of a PID reports 0%. I/O rates
/// use the explicit per-PID sample map below.
pub struct SystemProvider {
    /// System information collector
    system: Mutex<System>,
    /// Previous I/O sample per PID
    samples: Mutex<HashMap<Pid, SampleState>>,
    users: Mutex<Users>,
}

impl SystemProvider {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            samples: Mutex::new(HashMap::new()),
            users: Mutex::new(Users::new_with_refreshed_list()),
        }
    }

    /// Refresh one PID and report whether it is still present
    fn refresh_pid(system: &mut System, pid: Pid) -> bool {
        let sys_pid = sysinfo::Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        system.process(sys_pid).is_some()
    }

    /// Refresh the whole process table with the cheapest refresh kind
    fn refresh_table(system: &mut System) {
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new(),
        );
    }

    fn username(&self, uid: Option<&sysinfo::Uid>) -> String {
        let Some(uid) = uid else {
            return String::new();
        };

        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        if users.get_user_by_id(uid).is_none() {
            users.refresh_list();
        }

        users
            .get_user_by_id(uid)
            .map(|user| user.name().to_string())
            .unwrap_or_default()
    }

    /// Derive byte rates from the previous sample of `pid`
    fn io_stats(&self, pid: Pid, read_bytes: u64, write_bytes: u64) -> IoStats {
        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);

        let (read_rate, write_rate) = match samples.get(&pid) {
            Some(prev) => {
                let secs = now.duration_since(prev.at).as_secs_f64();
                if secs > 0.0 {
                    (
                        read_bytes.saturating_sub(prev.read_bytes) as f64 / secs,
                        write_bytes.saturating_sub(prev.write_bytes) as f64 / secs,
                    )
                } else {
                    (0.0, 0.0)
                }
            }
            None => (0.0, 0.0),
        };

        samples.insert(
            pid,
            SampleState {
                read_bytes,
                write_bytes,
                at: now,
            },
        );

        IoStats {
            read_bytes,
            write_bytes,
            read_rate,
            write_rate,
        }
    }

    fn forget(&self, pid: Pid) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&pid);
    }
}

impl Default for SystemProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessInfoProvider for SystemProvider {
    fn query(&self, pid: Pid) -> Option<ProcessInfo> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);

        if !Self::refresh_pid(&mut system, pid) {
            drop(system);
            self.forget(pid);
            return None;
        }

        let sys_pid = sysinfo::Pid::from_u32(pid);
        let process = system.process(sys_pid)?;

        let child_pids: BTreeSet<Pid> = system
            .processes()
            .iter()
            .filter(|(_, p)| p.parent() == Some(sys_pid))
            .map(|(child, _)| child.as_u32())
            .collect();

        let mut info = snapshot(pid, process, child_pids);
        let uid = process.user_id().cloned();
        drop(system);

        info.username = self.username(uid.as_ref());
        info.io_stats = self.io_stats(pid, info.io_stats.read_bytes, info.io_stats.write_bytes);

        if !info.running {
            info.mark_dead();
        }

        Some(info)
    }

    fn list_all(&self) -> Vec<ProcessInfo> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );

        // Threads show up in the table next to their process on Linux
        let mut threads = HashSet::new();
        let mut children: HashMap<Pid, BTreeSet<Pid>> = HashMap::new();
        for (pid, process) in system.processes() {
            if let Some(tasks) = process.tasks() {
                threads.extend(tasks.iter().filter(|task| *task != pid).map(|task| task.as_u32()));
            }
            if let Some(parent) = process.parent() {
                children
                    .entry(parent.as_u32())
                    .or_default()
                    .insert(pid.as_u32());
            }
        }

        let mut listed: Vec<(ProcessInfo, Option<sysinfo::Uid>)> = system
            .processes()
            .iter()
            .map(|(pid, process)| (pid.as_u32(), process))
            .filter(|(pid, _)| !threads.contains(pid))
            .map(|(pid, process)| {
                let child_pids = children.remove(&pid).unwrap_or_default();
                (snapshot(pid, process, child_pids), process.user_id().cloned())
            })
            .collect();
        drop(system);

        listed.sort_unstable_by_key(|(info, _)| info.pid);
        listed
            .into_iter()
            .map(|(mut info, uid)| {
                info.username = self.username(uid.as_ref());
                if !info.running {
                    info.mark_dead();
                }
                info
            })
            .collect()
    }

    fn find_pid_by_name(&self, name: &str) -> Option<Pid> {
        self.find_all_pids_by_name(name).into_iter().next()
    }

    fn find_all_pids_by_name(&self, name: &str) -> Vec<Pid> {
        if name.is_empty() {
            return Vec::new();
        }

        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        Self::refresh_table(&mut system);

        let mut pids: Vec<Pid> = system
            .processes()
            .iter()
            .filter(|(_, p)| !map_status(p.status()).is_terminal())
            .filter(|(_, p)| p.name().to_string_lossy().starts_with(name))
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();
        pids
    }

    fn list_children(&self, pid: Pid) -> Vec<Pid> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        Self::refresh_table(&mut system);

        let parent = sysinfo::Pid::from_u32(pid);
        let mut children: Vec<Pid> = system
            .processes()
            .iter()
            .filter(|(_, p)| p.parent() == Some(parent))
            .map(|(child, _)| child.as_u32())
            .collect();
        children.sort_unstable();
        children
    }

    fn is_alive(&self, pid: Pid) -> bool {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        if !Self::refresh_pid(&mut system, pid) {
            return false;
        }

        system
            .process(sysinfo::Pid::from_u32(pid))
            .map(|p| !map_status(p.status()).is_terminal())
            .unwrap_or(false)
    }
}

/// Build a snapshot from a refreshed table entry. Username is left empty
/// and the I/O counters carry no rates yet.
fn snapshot(pid: Pid, process: &sysinfo::Process, child_pids: BTreeSet<Pid>) -> ProcessInfo {
    let status = map_status(process.status());

    let mut command_line: Vec<String> = process
        .cmd()
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    if command_line.is_empty() {
        if let Some(exe) = process.exe() {
            command_line.push(exe.display().to_string());
        }
    }

    let extras = proc_extras(pid);
    let disk = process.disk_usage();

    ProcessInfo {
        pid,
        parent_pid: process.parent().map(|p| p.as_u32()).unwrap_or(0),
        name: process.name().to_string_lossy().into_owned(),
        command_line,
        username: String::new(),
        status,
        running: !status.is_terminal(),
        cpu_usage_percent: f64::from(process.cpu_usage()),
        memory_usage_kb: process.memory() / 1024,
        virtual_memory_kb: process.virtual_memory() / 1024,
        shared_memory_kb: extras.shared_memory_kb,
        priority: extras.nice,
        thread_count: extras
            .threads
            .or_else(|| process.tasks().map(|tasks| tasks.len() as u32))
            .unwrap_or(1),
        io_stats: IoStats {
            read_bytes: disk.total_read_bytes,
            write_bytes: disk.total_written_bytes,
            ..IoStats::default()
        },
        start_time: UNIX_EPOCH + Duration::from_secs(process.start_time()),
        uptime: Duration::from_secs(process.run_time()),
        child_pids,
    }
}

fn map_status(status: sysinfo::ProcessStatus) -> ProcessStatus {
    use sysinfo::ProcessStatus as Sys;

    match status {
        Sys::Run => ProcessStatus::Running,
        Sys::Sleep | Sys::Idle => ProcessStatus::Sleeping,
        Sys::UninterruptibleDiskSleep | Sys::LockBlocked | Sys::Waking | Sys::Wakekill => {
            ProcessStatus::Waiting
        }
        Sys::Stop | Sys::Tracing => ProcessStatus::Stopped,
        Sys::Zombie => ProcessStatus::Zombie,
        Sys::Dead => ProcessStatus::Dead,
        _ => ProcessStatus::Unknown,
    }
}

/// Fields sysinfo does not expose
#[derive(Debug, Default, PartialEq)]
struct ProcExtras {
    shared_memory_kb: u64,
    nice: i32,
    threads: Option<u32>,
}

#[cfg(target_os = "linux")]
fn proc_extras(pid: Pid) -> ProcExtras {
    let mut extras = std::fs::read_to_string(format!("/proc/{}/status", pid))
        .map(|status| parse_status(&status))
        .unwrap_or_default();

    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        extras.nice = parse_nice(&stat).unwrap_or(0);
    }

    extras
}

#[cfg(not(target_os = "linux"))]
fn proc_extras(_pid: Pid) -> ProcExtras {
    ProcExtras::default()
}

/// Pull shared memory and thread count out of `/proc/<pid>/status`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_status(status: &str) -> ProcExtras {
    let mut extras = ProcExtras::default();

    for line in status.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let number = value
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok());

        match (key, number) {
            ("RssFile", Some(kb)) | ("RssShmem", Some(kb)) => extras.shared_memory_kb += kb,
            ("Threads", Some(n)) => extras.threads = Some(n as u32),
            _ => {}
        }
    }

    extras
}

/// Nice value from `/proc/<pid>/stat`. The command name may contain spaces,
/// so fields are counted from the last closing parenthesis.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_nice(stat: &str) -> Option<i32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(16)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Child, Command};

    fn spawn_sleep(secs: &str) -> Child {
        let child = Command::new("sleep")
            .arg(secs)
            .spawn()
            .expect("Failed to spawn process");

        // Let the child exec before inspecting it
        std::thread::sleep(Duration::from_millis(100));
        child
    }

    #[test]
    fn test_parse_status() {
        let status = "Name:\tsleep\nVmRSS:\t    1024 kB\nRssAnon:\t     100 kB\n\
                      RssFile:\t     900 kB\nRssShmem:\t      24 kB\nThreads:\t3\n";

        let extras = parse_status(status);
        assert_eq!(extras.shared_memory_kb, 924);
        assert_eq!(extras.threads, Some(3));
    }

    #[test]
    fn test_parse_nice_with_spaces_in_name() {
        let stat = "1234 (my proc) S 1 1234 1234 0 -1 4194304 100 0 0 0 \
                    1 2 0 0 20 5 1 0 100 1000 50";
        assert_eq!(parse_nice(stat), Some(5));
        assert_eq!(parse_nice("garbage"), None);
    }

    #[test]
    fn test_list_all_includes_children_of_this_process() {
        let mut child = spawn_sleep("5");
        let provider = SystemProvider::new();
        let own = std::process::id();

        let all = provider.list_all();
        child.kill().ok();
        child.wait().ok();

        assert!(all.windows(2).all(|pair| pair[0].pid < pair[1].pid));
        let me = all.iter().find(|info| info.pid == own).unwrap();
        assert!(me.child_pids.contains(&child.id()));

        let sleeper = all.iter().find(|info| info.pid == child.id()).unwrap();
        assert_eq!(sleeper.parent_pid, own);
        assert_eq!(sleeper.io_stats.read_rate, 0.0);
    }

    #[test]
    fn test_query_own_process() {
        let provider = SystemProvider::new();
        let info = provider.query(std::process::id()).unwrap();

        assert_eq!(info.pid, std::process::id());
        assert!(info.running);
        assert!(info.memory_usage_kb > 0);
        assert!(info.thread_count >= 1);
        assert!(!info.command_line.is_empty());
    }

    #[test]
    fn test_query_missing_process() {
        let provider = SystemProvider::new();
        assert!(provider.query(u32::MAX - 1).is_none());
        assert!(!provider.is_alive(u32::MAX - 1));
    }

    #[test]
    fn test_first_io_sample_has_zero_rate() {
        let provider = SystemProvider::new();
        let stats = provider.io_stats(7, 4096, 4096);
        assert_eq!(stats.read_rate, 0.0);
        assert_eq!(stats.write_rate, 0.0);

        std::thread::sleep(Duration::from_millis(20));
        let stats = provider.io_stats(7, 8192, 4096);
        assert!(stats.read_rate > 0.0);
        assert_eq!(stats.write_rate, 0.0);
    }

    #[test]
    fn test_sleep_process_lifecycle() {
        let provider = SystemProvider::new();
        let mut child = spawn_sleep("5");
        let pid = child.id();

        assert!(provider.is_alive(pid));

        let info = provider.query(pid).unwrap();
        assert_eq!(info.name, "sleep");
        assert_eq!(info.parent_pid, std::process::id());
        assert_eq!(info.command_line, vec!["sleep".to_string(), "5".to_string()]);

        assert!(provider.find_all_pids_by_name("slee").contains(&pid));
        assert!(provider.find_pid_by_name("sleep").is_some());
        assert!(provider.list_children(std::process::id()).contains(&pid));

        child.kill().unwrap();
        child.wait().unwrap();

        assert!(!provider.is_alive(pid));
        assert!(provider.query(pid).is_none());
    }

    #[test]
    fn test_zombie_is_not_alive() {
        let provider = SystemProvider::new();
        let mut child = spawn_sleep("5");
        let pid = child.id();

        // Killed but not yet reaped
        child.kill().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(!provider.is_alive(pid));

        child.wait().unwrap();
    }

    #[test]
    fn test_find_by_empty_name() {
        let provider = SystemProvider::new();
        assert!(provider.find_all_pids_by_name("").is_empty());
    }
}
