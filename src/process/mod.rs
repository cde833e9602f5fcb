// Process module - Data model, OS collaborators and per-process policies

mod limits;
mod monitor;
mod provider;
mod restart;
mod spawner;
mod types;

pub use limits::{ResourceLimits, Violation};
pub use monitor::SystemProvider;
pub use provider::{ProcessController, ProcessInfoProvider};
pub use restart::{RestartDecision, RestartPolicy};
pub use spawner::SystemController;
pub use types::{IoStats, Pid, ProcessInfo, ProcessStats, ProcessStatus};
