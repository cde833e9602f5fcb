use crate::error::{Result, WatchError};
use crate::process::{Pid, ProcessController};
use std::process::{Command, Stdio};
use std::thread;

/// Process controller backed by `std::process` and POSIX signals
///
/// Every spawned child is reaped on a detached waiter thread so exited
/// children never linger as zombies.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemController;

impl SystemController {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessController for SystemController {
    /// Spawn `program` with `args`
    ///
    /// # Returns
    /// * `Ok(Pid)` - Process ID assigned by the OS
    /// * `Err(WatchError::LaunchFailed)` - The program could not be started
    fn spawn(&self, program: &str, args: &[String]) -> Result<Pid> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| WatchError::LaunchFailed {
                command: program.to_string(),
                reason: e.to_string(),
            })?;

        let pid = child.id();

        let reaper = thread::Builder::new()
            .name(format!("pidwatch-reaper-{}", pid))
            .spawn(move || match child.wait() {
                Ok(status) => tracing::debug!(pid, %status, "Child exited"),
                Err(e) => tracing::warn!(pid, "Failed to wait for child: {}", e),
            });
        if let Err(e) = reaper {
            tracing::warn!(pid, "Failed to start reaper thread: {}", e);
        }

        tracing::info!(pid, program, "Spawned process");
        Ok(pid)
    }

    #[cfg(unix)]
    fn terminate(&self, pid: Pid, force: bool) -> Result<()> {
        use nix::sys::signal::{self, Signal};

        let nix_pid = nix::unistd::Pid::from_raw(pid as i32);
        let sig = if force { Signal::SIGKILL } else { Signal::SIGTERM };

        tracing::info!(pid, signal = %sig, "Terminating process");

        signal::kill(nix_pid, sig).map_err(|e| WatchError::TerminateFailed {
            pid,
            reason: format!("Failed to send {}: {}", sig, e),
        })
    }

    #[cfg(not(unix))]
    fn terminate(&self, pid: Pid, force: bool) -> Result<()> {
        use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

        let sys_pid = sysinfo::Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new(),
        );

        let process = system.process(sys_pid).ok_or(WatchError::TerminateFailed {
            pid,
            reason: "no such process".to_string(),
        })?;

        let sent = if force {
            process.kill()
        } else {
            process
                .kill_with(sysinfo::Signal::Term)
                .unwrap_or_else(|| process.kill())
        };

        if sent {
            Ok(())
        } else {
            Err(WatchError::TerminateFailed {
                pid,
                reason: "signal was not delivered".to_string(),
            })
        }
    }

    #[cfg(unix)]
    fn set_priority(&self, pid: Pid, value: i32) -> Result<()> {
        use nix::errno::Errno;
        use nix::libc;

        // SAFETY: setpriority only reads its integer arguments
        let res = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, value) };

        Errno::result(res)
            .map(drop)
            .map_err(|e| WatchError::PriorityFailed {
                pid,
                reason: e.to_string(),
            })
    }

    #[cfg(not(unix))]
    fn set_priority(&self, pid: Pid, _value: i32) -> Result<()> {
        Err(WatchError::PriorityFailed {
            pid,
            reason: "not supported on this platform".to_string(),
        })
    }
}
