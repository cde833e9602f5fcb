use super::engine::Shared;
use crate::perf::SLOW_CALL_MS;
use std::sync::Arc;
use tracing::info;

/// Sweeps liveness on a fixed cadence, independent of the rate limiter, so
/// exits are noticed even when the refresh loops are throttled.
///
/// Dead entries stay in the registry; the auto-restart loop relaunches or
/// evicts them.
pub(super) fn run(shared: Arc<Shared>, epoch: u64) {
    info!("Exit detector started");

    while shared.is_live(epoch) {
        let pids = shared.registry().running_pids();
        let mut exited = 0;

        for pid in pids {
            if !shared.is_live(epoch) {
                break;
            }

            let alive = {
                let _timer = crate::perf_time!("provider.is_alive", SLOW_CALL_MS);
                shared.provider.is_alive(pid)
            };
            if alive {
                continue;
            }

            let transition = shared.registry().mark_dead(pid);
            if let Some(info) = transition {
                info!(pid, name = %info.name, "Process exited");
                shared.callbacks.exit(&info);
                exited += 1;
            }
        }

        if exited > 0 {
            shared.wakeups.restart.notify();
        }

        shared.heartbeat.beat();
        shared.wakeups.exit.wait(shared.cadence.exit_check());
    }

    info!("Exit detector exited");
}
