//! Execution scheduler: one thread per plugin, serialized by the execution lock.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::diagnostics::PluginFailure;
use crate::error::{Error, Result};
use crate::lifecycle::PluginState;
use crate::lock::{CancelToken, ExecutionLock, LockMode, LockStats};
use crate::plugin::PluginHandle;
use crate::value::HostValue;

/// Configuration for the execution scheduler.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
    /// How plugin execution is serialized.
    pub lock_mode: LockMode,
    /// Bound on waiting for the execution lock, in milliseconds.
    pub lock_timeout_ms: Option<u64>,
    /// Pause before re-invoking a `loop` that returned. `None` runs it once.
    pub loop_interval_ms: Option<u64>,
    /// Prefix for plugin thread names.
    pub thread_name_prefix: String,
    /// Stack size for plugin threads.
    pub stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_mode: LockMode::Exclusive,
            lock_timeout_ms: None,
            loop_interval_ms: None,
            thread_name_prefix: "plugin-".to_string(),
            stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// Create a new scheduler configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lock mode.
    pub fn with_lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    /// Bound lock acquisition.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Re-invoke `loop` with this pause whenever it returns.
    pub fn with_loop_interval(mut self, interval: Duration) -> Self {
        self.loop_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Set the thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the plugin thread stack size.
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Build the execution lock described by this configuration.
    pub fn build_lock(&self) -> ExecutionLock {
        ExecutionLock::new(self.lock_mode).with_timeout(self.lock_timeout_ms.map(Duration::from_millis))
    }
}

/// Outcome of a finished plugin task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// Plugin name.
    pub plugin: String,
    /// Final lifecycle state.
    pub state: PluginState,
    /// `loop` invocations made by the task.
    pub steps: u64,
    /// Failure that ended the task, if any.
    pub failure: Option<PluginFailure>,
}

struct PluginTask {
    plugin: PluginHandle,
    cancel: CancelToken,
    thread: JoinHandle<TaskReport>,
}

/// Runs each plugin's lifecycle on its own thread.
///
/// All plugins scheduled here share one [`ExecutionLock`]. In exclusive mode a
/// plugin that computes without reaching a yield point keeps every other
/// plugin waiting; the scheduler guarantees mutual exclusion only.
pub struct Scheduler {
    config: SchedulerConfig,
    lock: Arc<ExecutionLock>,
    tasks: DashMap<String, PluginTask>,
}

impl Scheduler {
    /// Create a scheduler with its own execution lock.
    pub fn new(config: SchedulerConfig) -> Self {
        let lock = Arc::new(config.build_lock());
        Self::with_lock(config, lock)
    }

    /// Create a scheduler around an existing lock.
    pub fn with_lock(config: SchedulerConfig, lock: Arc<ExecutionLock>) -> Self {
        Self {
            config,
            lock,
            tasks: DashMap::new(),
        }
    }

    /// Get the scheduler configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Get the execution lock shared by scheduled plugins.
    pub fn lock(&self) -> &Arc<ExecutionLock> {
        &self.lock
    }

    /// Get execution lock counters.
    pub fn lock_stats(&self) -> LockStats {
        self.lock.stats()
    }

    /// Drive `plugin` on a new thread: load if needed, initialize, then loop.
    ///
    /// The plugin must have been created around this scheduler's lock.
    pub fn spawn(&self, plugin: PluginHandle, init_arg: HostValue, loop_arg: HostValue) -> Result<()> {
        let name = plugin.name();

        if !Arc::ptr_eq(plugin.lock(), &self.lock) {
            return Err(Error::ForeignLock(name));
        }

        let replaced = match self.tasks.entry(name.clone()) {
            Entry::Occupied(entry) if !entry.get().thread.is_finished() => {
                return Err(Error::AlreadyScheduled(name));
            }
            Entry::Occupied(mut entry) => {
                let task = self.start(plugin, init_arg, loop_arg)?;
                Some(entry.insert(task))
            }
            Entry::Vacant(entry) => {
                entry.insert(self.start(plugin, init_arg, loop_arg)?);
                None
            }
        };

        if let Some(finished) = replaced {
            collect(finished);
        }
        tracing::info!(plugin = %name, mode = ?self.lock.mode(), "scheduled");
        Ok(())
    }

    fn start(&self, plugin: PluginHandle, init_arg: HostValue, loop_arg: HostValue) -> Result<PluginTask> {
        let cancel = CancelToken::new();
        let interval = self.config.loop_interval_ms.map(Duration::from_millis);

        let mut builder =
            thread::Builder::new().name(format!("{}{}", self.config.thread_name_prefix, plugin.name()));
        if let Some(size) = self.config.stack_size {
            builder = builder.stack_size(size);
        }

        let task_plugin = plugin.clone();
        let task_cancel = cancel.clone();
        let thread = builder.spawn(move || run(task_plugin, init_arg, loop_arg, task_cancel, interval))?;

        Ok(PluginTask {
            plugin,
            cancel,
            thread,
        })
    }

    /// Check if a plugin's task is still running.
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .get(name)
            .is_some_and(|task| !task.thread.is_finished())
    }

    /// Names of plugins whose task is still running.
    pub fn running(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|task| !task.thread.is_finished())
            .map(|task| task.key().clone())
            .collect()
    }

    /// Stop a scheduled plugin. Takes effect at its next yield point.
    pub fn stop(&self, name: &str) -> Result<()> {
        let (plugin, cancel) = self
            .tasks
            .get(name)
            .map(|task| (task.plugin.clone(), task.cancel.clone()))
            .ok_or_else(|| Error::plugin_not_found(name))?;

        cancel.cancel();
        match plugin.stop() {
            Ok(()) | Err(Error::InvalidTransition { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Stop every scheduled plugin.
    pub fn stop_all(&self) {
        let names: Vec<String> = self.tasks.iter().map(|task| task.key().clone()).collect();
        for name in names {
            let _ = self.stop(&name);
        }
    }

    /// Wait for a plugin's task to finish.
    ///
    /// Blocks until the plugin's `loop` returns or is stopped. A panic on the
    /// plugin thread is reported as a failure of the plugin.
    pub fn join(&self, name: &str) -> Result<TaskReport> {
        let (_, task) = self
            .tasks
            .remove(name)
            .ok_or_else(|| Error::plugin_not_found(name))?;
        Ok(collect(task))
    }

    /// Wait for every task to finish.
    pub fn join_all(&self) -> Vec<TaskReport> {
        let names: Vec<String> = self.tasks.iter().map(|task| task.key().clone()).collect();
        names
            .iter()
            .filter_map(|name| self.join(name).ok())
            .collect()
    }

    /// Get the number of tracked tasks, finished or not.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if no tasks are tracked.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("task_count", &self.tasks.len())
            .finish()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // threads are detached; they exit at their next yield point
        self.stop_all();
    }
}

fn collect(task: PluginTask) -> TaskReport {
    let PluginTask { plugin, thread, .. } = task;
    match thread.join() {
        Ok(report) => report,
        Err(payload) => {
            plugin.fail_after_panic(&panic_message(payload.as_ref()));
            report(&plugin, 0)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn report(plugin: &PluginHandle, steps_before: u64) -> TaskReport {
    let info = plugin.info();
    let failure = match info.state {
        PluginState::Failed => info.last_failure.clone(),
        _ => None,
    };

    TaskReport {
        plugin: info.name,
        state: info.state,
        steps: info.step_count.saturating_sub(steps_before),
        failure,
    }
}

fn run(
    plugin: PluginHandle,
    init_arg: HostValue,
    loop_arg: HostValue,
    cancel: CancelToken,
    interval: Option<Duration>,
) -> TaskReport {
    let steps_before = plugin.info().step_count;

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        drive(&plugin, init_arg, loop_arg, &cancel, interval)
    }));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(Error::Interrupted)) => tracing::debug!(plugin = %plugin.name(), "task interrupted"),
        Ok(Err(e)) => tracing::debug!(plugin = %plugin.name(), error = %e, "task ended"),
        Err(payload) => plugin.fail_after_panic(&panic_message(payload.as_ref())),
    }

    report(&plugin, steps_before)
}

fn drive(
    plugin: &PluginHandle,
    init_arg: HostValue,
    loop_arg: HostValue,
    cancel: &CancelToken,
    interval: Option<Duration>,
) -> Result<()> {
    if plugin.state().can_load() {
        plugin.load()?;
    }
    if plugin.state().can_initialize() {
        plugin.initialize(init_arg)?;
    }

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        plugin.step(loop_arg.clone())?;

        match interval {
            Some(pause) if !cancel.wait_timeout(pause) => continue,
            _ => return Ok(()),
        }
    }
}
