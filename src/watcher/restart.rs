use super::engine::Shared;
use crate::error::WatchError;
use crate::process::{Pid, RestartDecision, RestartPolicy};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug)]
enum Action {
    Relaunch {
        pid: Pid,
        attempt: u32,
        max_attempts: u32,
        command_line: Vec<String>,
    },
    Exhausted {
        pid: Pid,
        attempts: u32,
    },
}

/// Relaunches or evicts dead entries
pub(super) fn run(shared: Arc<Shared>, epoch: u64) {
    info!("Auto-restart loop started");

    while shared.is_live(epoch) {
        for action in plan(&shared) {
            execute(&shared, action);
        }

        if shared.registry().is_empty() {
            shared.stop_if_idle(epoch);
            continue;
        }

        shared.heartbeat.beat();
        shared.wakeups.restart.wait(shared.cadence.auto_restart());
    }

    info!("Auto-restart loop exited");
}

/// Decide the fate of every dead entry under one registry lock. Attempt
/// counters are bumped here, before the relaunch, so a failing launch still
/// uses up an attempt.
fn plan(shared: &Shared) -> Vec<Action> {
    let mut registry = shared.registry();
    let mut actions = Vec::new();

    for pid in registry.dead_pids() {
        let policy = RestartPolicy::from_config(&registry.effective_config(pid));

        match policy.decide(registry.restart_attempts(pid)) {
            RestartDecision::Relaunch { attempt } => {
                registry.set_restart_attempts(pid, attempt);
                let command_line = registry
                    .get(pid)
                    .map(|info| info.command_line.clone())
                    .unwrap_or_default();
                actions.push(Action::Relaunch {
                    pid,
                    attempt,
                    max_attempts: policy.max_attempts,
                    command_line,
                });
            }
            RestartDecision::Evict => {
                registry.remove(pid);
                info!(pid, "Stopped monitoring exited process");
            }
            RestartDecision::Exhausted { attempts } => {
                registry.remove(pid);
                actions.push(Action::Exhausted { pid, attempts });
            }
        }
    }

    actions
}

fn execute(shared: &Shared, action: Action) {
    match action {
        Action::Relaunch {
            pid,
            attempt,
            max_attempts,
            command_line,
        } => {
            info!(pid, attempt, max_attempts, "Relaunching exited process");

            match shared.launch(&command_line) {
                Ok(info) => {
                    let new_pid = info.pid;
                    if shared.registry().move_entry(pid, info) {
                        info!(old_pid = pid, pid = new_pid, "Process relaunched");
                    } else {
                        warn!(
                            old_pid = pid,
                            pid = new_pid,
                            "Process was unmonitored while relaunching, leaving new instance unmonitored"
                        );
                    }
                }
                Err(e) => {
                    error!(pid, "Failed to relaunch process: {}", e);
                    shared.callbacks.report(&e);
                }
            }
        }
        Action::Exhausted { pid, attempts } => {
            let err = WatchError::RestartExhausted { pid, attempts };
            warn!("{}", err);
            shared.callbacks.report(&err);
        }
    }
}
