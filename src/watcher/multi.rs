use super::engine::Shared;
use super::registry::Refresh;
use crate::process::Pid;
use std::sync::Arc;
use tracing::{debug, info};

/// Refreshes every running process once per sweep and hands the batch to
/// the multi-monitor callback
pub(super) fn run(shared: Arc<Shared>, epoch: u64) {
    info!("Multi-monitor loop started");

    while shared.is_live(epoch) {
        let (pids, empty, interval) = {
            let registry = shared.registry();
            (
                registry.running_pids(),
                registry.is_empty(),
                registry.global().update_interval(),
            )
        };

        if empty {
            shared.stop_if_idle(epoch);
            continue;
        }

        if !pids.is_empty() {
            if !shared.rate_limiter.try_acquire() {
                debug!("Multi-monitor loop throttled");
                shared.wakeups.multi.wait(shared.cadence.throttle_backoff());
                continue;
            }
            sweep(&shared, epoch, &pids);
        }

        shared.heartbeat.beat();
        let interval = if interval.is_zero() {
            shared.cadence.idle_tick()
        } else {
            interval
        };
        shared.wakeups.multi.wait(interval);
    }

    info!("Multi-monitor loop exited");
}

fn sweep(shared: &Shared, epoch: u64, pids: &[Pid]) {
    let mut batch = Vec::with_capacity(pids.len());
    let mut exited = false;

    for &pid in pids {
        if !shared.is_live(epoch) {
            return;
        }

        match shared.refresh(pid) {
            Refresh::Updated(info) => {
                let config = shared.registry().effective_config(pid);
                if config.monitor_children {
                    shared.cascade_children(pid, &config);
                }
                batch.push(info);
            }
            Refresh::Exited(info) => {
                info!(pid, name = %info.name, "Process exited");
                shared.callbacks.exit(&info);
                exited = true;
            }
            Refresh::Stale => {}
        }
    }

    if exited {
        shared.wakeups.restart.notify();
    }
    if !batch.is_empty() {
        shared.callbacks.multi_tick(&batch);
    }
}
