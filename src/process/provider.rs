use crate::error::Result;
use crate::process::{Pid, ProcessInfo};

/// Point queries against the operating system's process table.
///
/// Implementations keep whatever per-PID sample state they need for
/// derived metrics (CPU%, I/O rates); the engine never caches it for them.
pub trait ProcessInfoProvider: Send + Sync {
    /// Detailed snapshot of one process, `None` if it does not exist
    fn query(&self, pid: Pid) -> Option<ProcessInfo>;

    /// First process whose name matches `name`
    fn find_pid_by_name(&self, name: &str) -> Option<Pid>;

    /// Every process whose name matches `name`, in ascending PID order
    fn find_all_pids_by_name(&self, name: &str) -> Vec<Pid>;

    /// Direct children of `pid`
    fn list_children(&self, pid: Pid) -> Vec<Pid>;

    /// Whether `pid` exists and is not a zombie
    fn is_alive(&self, pid: Pid) -> bool;

    /// Snapshot of every process in the table, in ascending PID order. I/O
    /// rates are not derived for these.
    fn list_all(&self) -> Vec<ProcessInfo>;
}

/// Process lifecycle primitives
pub trait ProcessController: Send + Sync {
    /// Launch `program` with `args` and return the new PID
    fn spawn(&self, program: &str, args: &[String]) -> Result<Pid>;

    /// Ask `pid` to exit, or kill it outright when `force` is set
    fn terminate(&self, pid: Pid, force: bool) -> Result<()>;

    /// Set the scheduling priority (nice value) of `pid`
    fn set_priority(&self, pid: Pid, value: i32) -> Result<()>;
}
