use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

/// Operating-system process identifier
pub type Pid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProcessStatus {
    #[default]
    Unknown,
    Running,
    Sleeping,
    Waiting,
    Stopped,
    Zombie,
    Dead,
}

impl ProcessStatus {
    /// Zombie and dead processes are never considered running
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessStatus::Zombie | ProcessStatus::Dead)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Unknown => write!(f, "unknown"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Sleeping => write!(f, "sleeping"),
            ProcessStatus::Waiting => write!(f, "waiting"),
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Zombie => write!(f, "zombie"),
            ProcessStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Cumulative I/O counters plus the rates derived from the previous sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IoStats {
    pub read_bytes: u64,
    pub write_bytes: u64,
    /// Bytes per second since the previous sample
    pub read_rate: f64,
    /// Bytes per second since the previous sample
    pub write_rate: f64,
}

/// Snapshot of one process at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub parent_pid: Pid,
    pub name: String,
    /// argv of the process, program first
    pub command_line: Vec<String>,
    pub username: String,
    pub status: ProcessStatus,
    pub running: bool,
    pub cpu_usage_percent: f64,
    pub memory_usage_kb: u64,
    pub virtual_memory_kb: u64,
    pub shared_memory_kb: u64,
    pub priority: i32,
    pub thread_count: u32,
    pub io_stats: IoStats,
    pub start_time: SystemTime,
    pub uptime: Duration,
    pub child_pids: BTreeSet<Pid>,
}

impl ProcessInfo {
    /// Minimal entry used when a detailed query is not available
    pub fn placeholder(pid: Pid, name: impl Into<String>) -> Self {
        Self {
            pid,
            parent_pid: 0,
            name: name.into(),
            command_line: Vec::new(),
            username: String::new(),
            status: ProcessStatus::Running,
            running: true,
            cpu_usage_percent: 0.0,
            memory_usage_kb: 0,
            virtual_memory_kb: 0,
            shared_memory_kb: 0,
            priority: 0,
            thread_count: 0,
            io_stats: IoStats::default(),
            start_time: SystemTime::now(),
            uptime: Duration::ZERO,
            child_pids: BTreeSet::new(),
        }
    }

    /// Record that the process is gone. Keeps identity fields (name, command
    /// line) so the entry can still be relaunched.
    pub fn mark_dead(&mut self) {
        self.running = false;
        self.status = ProcessStatus::Dead;
        self.cpu_usage_percent = 0.0;
        self.memory_usage_kb = 0;
        self.io_stats.read_rate = 0.0;
        self.io_stats.write_rate = 0.0;
    }

    /// Command line joined with spaces, for display
    pub fn command_string(&self) -> String {
        self.command_line.join(" ")
    }
}

/// Per-process monitoring statistics, updated on every successful refresh
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessStats {
    pub cpu_usage: f64,
    pub memory_kb: u64,
    pub threads: u32,
    pub io_read_rate: f64,
    pub io_write_rate: f64,
    pub samples: u64,
    pub cpu_violations: usize,
    pub memory_violations: usize,
    pub last_sample: Option<SystemTime>,
}

impl ProcessStats {
    pub fn record_sample(&mut self, info: &ProcessInfo) {
        self.cpu_usage = info.cpu_usage_percent;
        self.memory_kb = info.memory_usage_kb;
        self.threads = info.thread_count;
        self.io_read_rate = info.io_stats.read_rate;
        self.io_write_rate = info.io_stats.write_rate;
        self.samples += 1;
        self.last_sample = Some(SystemTime::now());
    }

    pub fn record_memory_violation(&mut self) {
        self.memory_violations += 1;
    }

    pub fn record_cpu_violation(&mut self) {
        self.cpu_violations += 1;
    }
}
