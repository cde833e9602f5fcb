use super::engine::Shared;
use super::registry::Refresh;
use crate::config::MonitorConfig;
use crate::process::Pid;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Refreshes the primary process and drives the scalar monitor callback
pub(super) fn run(shared: Arc<Shared>, epoch: u64) {
    info!("Monitor loop started");

    while shared.is_live(epoch) {
        let target = {
            let registry = shared.registry();
            registry.primary().map(|pid| {
                let running = registry.get(pid).is_some_and(|info| info.running);
                (pid, running, registry.effective_config(pid))
            })
        };

        let Some((pid, running, config)) = target else {
            shared.heartbeat.beat();
            shared.wakeups.monitor.wait(shared.cadence.idle_tick());
            continue;
        };

        // A dead primary is waiting for the auto-restart loop
        if running {
            if !shared.rate_limiter.try_acquire() {
                debug!(pid, "Monitor loop throttled");
                shared.wakeups.monitor.wait(shared.cadence.throttle_backoff());
                continue;
            }
            poll(&shared, epoch, pid, &config);
        }

        shared.heartbeat.beat();
        shared.wakeups.monitor.wait(interval(&shared, &config));
    }

    info!("Monitor loop exited");
}

fn poll(shared: &Shared, epoch: u64, pid: Pid, config: &MonitorConfig) {
    match shared.refresh(pid) {
        Refresh::Updated(info) => {
            if config.monitor_children {
                shared.cascade_children(pid, config);
            }
            shared.callbacks.monitor_tick(&info);
        }
        Refresh::Exited(info) => {
            info!(pid, name = %info.name, "Primary process exited");
            shared.callbacks.monitor_tick(&info);
            shared.callbacks.exit(&info);

            let idle = {
                let mut registry = shared.registry();
                if registry.effective_config(pid).auto_restart {
                    None
                } else {
                    registry.remove(pid);
                    Some(registry.is_empty())
                }
            };

            match idle {
                None => shared.wakeups.restart.notify(),
                Some(true) => shared.stop_if_idle(epoch),
                Some(false) => debug!(pid, "Removed exited primary process"),
            }
        }
        Refresh::Stale => {}
    }
}

/// Monitor-tick interval if one was requested, else the primary's update
/// interval; a zero interval falls back to the idle tick
fn interval(shared: &Shared, config: &MonitorConfig) -> Duration {
    let interval = shared
        .callbacks
        .monitor_interval()
        .unwrap_or_else(|| config.update_interval());

    if interval.is_zero() {
        shared.cadence.idle_tick()
    } else {
        interval
    }
}
