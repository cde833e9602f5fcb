// Library exports for the pidwatch supervision engine

pub mod cli;
pub mod config;
pub mod error;
pub mod perf;
pub mod process;
pub mod watcher;

pub use config::{Cadence, MonitorConfig, Target, WatchConfig};
pub use error::{Result, WatchError};
pub use process::{
    IoStats, Pid, ProcessController, ProcessInfo, ProcessInfoProvider, ProcessStats,
    ProcessStatus, ResourceLimits, SystemController, SystemProvider,
};
pub use watcher::{RateLimiter, Watcher};
