use crate::error::WatchError;
use crate::process::{Pid, ProcessInfo, ResourceLimits};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;
use tracing::error;

pub type ExitCallback = Arc<dyn Fn(&ProcessInfo) + Send + Sync>;
pub type MonitorCallback = Arc<dyn Fn(&ProcessInfo) + Send + Sync>;
pub type MultiMonitorCallback = Arc<dyn Fn(&[ProcessInfo]) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str, i32) + Send + Sync>;
pub type ResourceLimitCallback = Arc<dyn Fn(&ProcessInfo, &ResourceLimits) + Send + Sync>;
pub type ProcessCreatedCallback = Arc<dyn Fn(Pid, &str) + Send + Sync>;
pub type ProcessFilter = Arc<dyn Fn(&ProcessInfo) -> bool + Send + Sync>;

/// Callbacks registered by the embedding application
#[derive(Default, Clone)]
pub(crate) struct Callbacks {
    pub on_exit: Option<ExitCallback>,
    pub on_monitor_tick: Option<MonitorCallback>,
    /// Polling interval requested together with the monitor callback
    pub monitor_interval: Option<Duration>,
    pub on_multi_tick: Option<MultiMonitorCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_resource_limit_exceeded: Option<ResourceLimitCallback>,
    pub on_process_created: Option<ProcessCreatedCallback>,
    pub filter: Option<ProcessFilter>,
}

/// Invokes user callbacks outside every engine lock.
///
/// Each call clones the callback handle under a short read lock, releases
/// it, then runs the callback under `catch_unwind`. A panic is logged and
/// reported through the error callback as `CallbackPanicked`; a panic in the
/// error callback itself is only logged.
#[derive(Default)]
pub(crate) struct Dispatcher {
    callbacks: RwLock<Callbacks>,
}

impl Dispatcher {
    fn read(&self) -> RwLockReadGuard<'_, Callbacks> {
        self.callbacks.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update(&self, edit: impl FnOnce(&mut Callbacks)) {
        let mut callbacks = self
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        edit(&mut callbacks);
    }

    pub fn monitor_interval(&self) -> Option<Duration> {
        self.read().monitor_interval
    }

    pub fn exit(&self, info: &ProcessInfo) {
        let callback = self.read().on_exit.clone();
        if let Some(callback) = callback {
            self.guarded("on_exit", || callback(info));
        }
    }

    pub fn monitor_tick(&self, info: &ProcessInfo) {
        let callback = self.read().on_monitor_tick.clone();
        if let Some(callback) = callback {
            self.guarded("on_monitor_tick", || callback(info));
        }
    }

    pub fn multi_tick(&self, batch: &[ProcessInfo]) {
        let callback = self.read().on_multi_tick.clone();
        if let Some(callback) = callback {
            self.guarded("on_multi_tick", || callback(batch));
        }
    }

    pub fn resource_limit(&self, info: &ProcessInfo, limits: &ResourceLimits) {
        let callback = self.read().on_resource_limit_exceeded.clone();
        if let Some(callback) = callback {
            self.guarded("on_resource_limit_exceeded", || callback(info, limits));
        }
    }

    pub fn process_created(&self, pid: Pid, command: &str) {
        let callback = self.read().on_process_created.clone();
        if let Some(callback) = callback {
            self.guarded("on_process_created", || callback(pid, command));
        }
    }

    /// Run the process filter. No filter accepts everything; a panicking
    /// filter rejects.
    pub fn accepts(&self, info: &ProcessInfo) -> bool {
        let filter = self.read().filter.clone();
        match filter {
            Some(filter) => self.guarded("process_filter", || filter(info)).unwrap_or(false),
            None => true,
        }
    }

    /// Hand an error to the error callback
    pub fn report(&self, err: &WatchError) {
        let callback = self.read().on_error.clone();
        let Some(callback) = callback else {
            return;
        };

        let message = err.to_string();
        let code = err.code();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&message, code))) {
            error!("on_error callback panicked: {}", panic_message(&*payload));
        }
    }

    fn guarded<R>(&self, name: &str, call: impl FnOnce() -> R) -> Option<R> {
        match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(value) => Some(value),
            Err(payload) => {
                let message = format!("{}: {}", name, panic_message(&*payload));
                error!("Callback panicked: {}", message);
                self.report(&WatchError::CallbackPanicked(message));
                None
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
