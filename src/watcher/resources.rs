use super::engine::Shared;
use crate::process::{ProcessInfo, ResourceLimits};
use std::sync::Arc;
use tracing::{info, warn};

/// Compares the cached metrics of running processes against their limits.
/// Remediation is left to the callback.
pub(super) fn run(shared: Arc<Shared>, epoch: u64) {
    info!("Resource monitor started");

    while shared.is_live(epoch) {
        let candidates = collect(&shared);
        check(&shared, candidates);

        shared.heartbeat.beat();
        shared.wakeups.resources.wait(shared.cadence.resource_check());
    }

    info!("Resource monitor exited");
}

/// Running processes that have at least one limit configured
fn collect(shared: &Shared) -> Vec<(ProcessInfo, ResourceLimits)> {
    let registry = shared.registry();

    registry
        .running_pids()
        .into_iter()
        .filter_map(|pid| {
            let limits = registry.effective_config(pid).resource_limits;
            if limits.is_unlimited() {
                return None;
            }
            registry.get(pid).map(|info| (info.clone(), limits))
        })
        .collect()
}

fn check(shared: &Shared, candidates: Vec<(ProcessInfo, ResourceLimits)>) {
    for (info, limits) in candidates {
        let Some(violation) = limits.check(&info) else {
            continue;
        };

        warn!(
            pid = info.pid,
            name = %info.name,
            cpu_percent = info.cpu_usage_percent,
            memory_kb = info.memory_usage_kb,
            max_cpu_percent = limits.max_cpu_percent,
            max_memory_kb = limits.max_memory_kb,
            "Resource limit exceeded"
        );

        {
            let mut registry = shared.registry();
            if let Some(stats) = registry.stats_mut(info.pid) {
                if violation.cpu {
                    stats.record_cpu_violation();
                }
                if violation.memory {
                    stats.record_memory_violation();
                }
            }
        }

        shared.callbacks.resource_limit(&info, &limits);
    }
}
