use crate::process::Pid;
use thiserror::Error;

// errno-flavoured codes handed to the `on_error` callback
const EPERM: i32 = 1;
const ESRCH: i32 = 3;
const EIO: i32 = 5;
const ECHILD: i32 = 10;
const EAGAIN: i32 = 11;
const EEXIST: i32 = 17;
const EINVAL: i32 = 22;
const EDEADLK: i32 = 35;

/// Main error type for the pidwatch supervision engine
#[derive(Debug, Error)]
pub enum WatchError {
    // Registration errors
    #[error("No process found matching '{0}'")]
    NotFound(String),

    #[error("Process {0} is not running")]
    NotRunning(Pid),

    #[error("Process {0} is not being monitored")]
    NotMonitored(Pid),

    #[error("Process {0} is already being monitored")]
    AlreadyMonitored(Pid),

    #[error("Process {0} was rejected by the process filter")]
    Rejected(Pid),

    #[error("Failed to query information for process {0}")]
    QueryFailed(Pid),

    // Process control errors
    #[error("Failed to launch '{command}': {reason}")]
    LaunchFailed { command: String, reason: String },

    #[error("Failed to terminate process {pid}: {reason}")]
    TerminateFailed { pid: Pid, reason: String },

    #[error("Failed to set priority of process {pid}: {reason}")]
    PriorityFailed { pid: Pid, reason: String },

    #[error("Restart attempts exhausted for process {pid} after {attempts} attempt(s)")]
    RestartExhausted { pid: Pid, attempts: u32 },

    // Engine errors
    #[error("Watchdog recovery failed: {0}")]
    WatchdogRecoveryFailed(String),

    #[error("Callback panicked: {0}")]
    CallbackPanicked(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Numeric code reported alongside the message to error callbacks
    pub fn code(&self) -> i32 {
        match self {
            WatchError::NotFound(_)
            | WatchError::NotRunning(_)
            | WatchError::NotMonitored(_)
            | WatchError::QueryFailed(_) => ESRCH,
            WatchError::AlreadyMonitored(_) => EEXIST,
            WatchError::Rejected(_) => EPERM,
            WatchError::LaunchFailed { .. } => ECHILD,
            WatchError::TerminateFailed { .. } | WatchError::PriorityFailed { .. } => EPERM,
            WatchError::RestartExhausted { .. } => EAGAIN,
            WatchError::WatchdogRecoveryFailed(_) => EDEADLK,
            WatchError::CallbackPanicked(_) => EIO,
            WatchError::ConfigError(_)
            | WatchError::InvalidConfig(_)
            | WatchError::ConfigValidationError(_) => EINVAL,
            WatchError::Io(e) => e.raw_os_error().unwrap_or(EIO),
        }
    }
}

/// Result type alias for pidwatch operations
pub type Result<T> = std::result::Result<T, WatchError>;
