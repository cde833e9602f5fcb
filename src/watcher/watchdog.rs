use super::engine::{Recovery, Shared};
use crate::error::WatchError;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Supervises the five operational loops through the shared heartbeat.
///
/// Every window without a beat is a strike; at the configured number of
/// strikes the loops are torn down and respawned. A failed recovery shuts
/// the engine down and is reported as `WatchdogRecoveryFailed`.
pub(super) fn run(shared: Arc<Shared>, mut epoch: u64) {
    info!("Watchdog started");
    let mut strikes = 0u32;

    while shared.is_live(epoch) {
        let interrupted = shared.wakeups.watchdog.wait(shared.cadence.watchdog());
        if !shared.is_live(epoch) {
            break;
        }
        if interrupted {
            continue;
        }

        if shared.heartbeat.take() {
            if strikes > 0 {
                debug!("Supervision loops reported progress again");
            }
            strikes = 0;
            continue;
        }

        strikes += 1;
        warn!(strikes, "No supervision loop reported progress");
        if strikes < shared.cadence.watchdog_strikes {
            continue;
        }

        match shared.recover(epoch) {
            Recovery::Resumed(next) => {
                epoch = next;
                strikes = 0;
            }
            Recovery::Stopped => break,
            Recovery::Failed(reason) => {
                let err = WatchError::WatchdogRecoveryFailed(reason);
                error!("{}", err);
                shared.callbacks.report(&err);
                break;
            }
        }
    }

    info!("Watchdog exited");
}
