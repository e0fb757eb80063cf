//! Plugin representation and lifecycle driving.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::builtins::OutputHook;
use crate::context::{ContextConfig, InterpreterContext};
use crate::diagnostics::PluginFailure;
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleEvent, PluginState, SharedHooks};
use crate::lock::ExecutionLock;
use crate::value::HostValue;

/// Name of the one-time setup callable.
pub const INITIALIZE: &str = "initialize";

/// Name of the repeatedly invoked callable.
///
/// `loop` is a keyword in the script language, so the hook is spelled `step`.
pub const LOOP: &str = "step";

static NEXT_PLUGIN_ID: AtomicU64 = AtomicU64::new(1);

/// Name and source text of a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Plugin name.
    pub name: String,
    /// Script source.
    pub source: String,
    /// File the source was read from.
    pub path: Option<PathBuf>,
}

impl PluginDescriptor {
    /// Create a descriptor from source text.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            path: None,
        }
    }

    /// Read a descriptor from a script file, named after the file stem.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unnamed")
            .to_string();

        Ok(Self {
            name,
            source,
            path: Some(path.to_path_buf()),
        })
    }
}

/// Information about a plugin.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    /// Unique plugin ID.
    pub id: u64,
    /// Plugin name.
    pub name: String,
    /// Source file, if loaded from disk.
    pub path: Option<PathBuf>,
    /// Current lifecycle state.
    pub state: PluginState,
    /// When the last successful load finished.
    pub loaded_at: Option<Instant>,
    /// Load attempts, including retries.
    pub load_count: u64,
    /// `loop` invocations.
    pub step_count: u64,
    /// Ad-hoc calls.
    pub call_count: u64,
    /// Most recent failure.
    pub last_failure: Option<PluginFailure>,
}

struct PluginInner {
    info: PluginInfo,
    context: Option<Arc<InterpreterContext>>,
    busy: bool,
}

/// A script plugin driven through `load → initialize → loop`.
///
/// Lifecycle operations on one plugin are serialized: a second operation
/// started while one is running is rejected with
/// [`Error::InvalidTransition`]. [`stop`](Self::stop) and ad-hoc
/// [`call`](Self::call)s are accepted at any time.
pub struct Plugin {
    descriptor: PluginDescriptor,
    config: ContextConfig,
    lock: Arc<ExecutionLock>,
    hooks: Option<SharedHooks>,
    output: Option<OutputHook>,
    inner: RwLock<PluginInner>,
}

impl Plugin {
    /// Create an unloaded plugin whose context will share `lock`.
    pub fn new(descriptor: PluginDescriptor, config: ContextConfig, lock: Arc<ExecutionLock>) -> Self {
        let info = PluginInfo {
            id: NEXT_PLUGIN_ID.fetch_add(1, Ordering::Relaxed),
            name: descriptor.name.clone(),
            path: descriptor.path.clone(),
            state: PluginState::Unloaded,
            loaded_at: None,
            load_count: 0,
            step_count: 0,
            call_count: 0,
            last_failure: None,
        };

        Self {
            descriptor,
            config,
            lock,
            hooks: None,
            output: None,
            inner: RwLock::new(PluginInner {
                info,
                context: None,
                busy: false,
            }),
        }
    }

    /// Deliver lifecycle events to `hooks`.
    pub fn with_hooks(mut self, hooks: SharedHooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Route script output to `hook`.
    pub fn with_output(mut self, hook: OutputHook) -> Self {
        self.output = Some(hook);
        self
    }

    /// Get the plugin ID.
    pub fn id(&self) -> u64 {
        self.inner.read().info.id
    }

    /// Get the plugin name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Get the plugin descriptor.
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Get plugin information.
    pub fn info(&self) -> PluginInfo {
        self.inner.read().info.clone()
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> PluginState {
        self.inner.read().info.state
    }

    /// Get the most recent failure.
    pub fn last_failure(&self) -> Option<PluginFailure> {
        self.inner.read().info.last_failure.clone()
    }

    /// Get the live interpreter context, if any.
    pub fn context(&self) -> Option<Arc<InterpreterContext>> {
        self.inner.read().context.clone()
    }

    /// Get the execution lock every context of this plugin uses.
    pub fn lock(&self) -> &Arc<ExecutionLock> {
        &self.lock
    }

    /// Run the plugin's top-level code in a fresh context.
    ///
    /// Allowed from `Unloaded`, and from `Failed` as a retry.
    pub fn load(&self) -> Result<()> {
        let context = Arc::new(InterpreterContext::new(
            self.descriptor.name.clone(),
            &self.config,
            self.lock.clone(),
        ));
        context.set_output_hook(self.output.clone());

        {
            let mut inner = self.inner.write();
            let state = inner.info.state;
            if inner.busy || !state.can_load() {
                return Err(Error::invalid_transition("load", state));
            }
            inner.info.state = PluginState::Unloaded;
            inner.info.load_count += 1;
            inner.context = Some(context.clone());
            inner.busy = true;
        }

        tracing::debug!(plugin = %self.name(), "loading");
        let result = context.load(&self.descriptor.source);
        self.finish(result, PluginState::Loaded)
    }

    /// Call `initialize(arg)` once.
    pub fn initialize(&self, arg: HostValue) -> Result<()> {
        let context = self.begin("initialize", PluginState::can_initialize)?;
        let result = context.call(INITIALIZE, &[arg]).map(|_| ());
        self.finish(result, PluginState::Initialized)
    }

    /// Call the script's loop hook once and return its result.
    ///
    /// A hook that repeats internally may not return until the plugin is
    /// stopped, so run this on a dedicated thread.
    pub fn step(&self, arg: HostValue) -> Result<HostValue> {
        let context = self.begin("step", PluginState::can_step)?;
        let result = context.call(LOOP, &[arg]);
        self.finish(result, PluginState::Looping)
    }

    /// Stop the plugin and request cancellation of any running code.
    ///
    /// Cancellation takes effect at the running code's next yield point.
    pub fn stop(&self) -> Result<()> {
        let context = {
            let mut inner = self.inner.write();
            let state = inner.info.state;
            if state.is_terminal() {
                return Err(Error::invalid_transition("stop", state));
            }
            inner.info.state = PluginState::Stopped;
            inner.context.take()
        };

        if let Some(context) = context {
            context.cancel();
        }

        tracing::info!(plugin = %self.name(), "stopped");
        self.emit_entered(PluginState::Stopped);
        Ok(())
    }

    /// Call a function of a loaded plugin without changing its state.
    ///
    /// The lifecycle hooks [`INITIALIZE`] and [`LOOP`] are only reachable
    /// through [`initialize`](Self::initialize) and [`step`](Self::step).
    pub fn call(&self, function: &str, args: &[HostValue]) -> Result<HostValue> {
        let context = self.live_context("call")?;
        if function == INITIALIZE || function == LOOP {
            return Err(Error::invalid_transition("call", self.state()));
        }
        self.inner.write().info.call_count += 1;
        context.call(function, args)
    }

    /// Read a global of a loaded plugin.
    pub fn global(&self, name: &str) -> Result<HostValue> {
        self.live_context("read globals from")?.get_global(name)
    }

    /// Write a global of a loaded plugin.
    pub fn set_global(&self, name: impl Into<String>, value: HostValue) -> Result<()> {
        self.live_context("write globals to")?.set_global(name, value)
    }

    /// List the plugin's functions as `(name, arity)`.
    pub fn functions(&self) -> Vec<(String, usize)> {
        self.context()
            .map(|context| context.functions())
            .unwrap_or_default()
    }

    /// Record that the thread driving this plugin panicked.
    pub(crate) fn fail_after_panic(&self, message: &str) {
        let failure = {
            let mut inner = self.inner.write();
            inner.busy = false;
            if inner.info.state.is_terminal() {
                return;
            }
            let error = Error::raised(format!("plugin thread panicked: {}", message));
            let report = PluginFailure::new(self.name(), inner.info.state, &error);
            inner.info.state = PluginState::Failed;
            inner.info.last_failure = Some(report.clone());
            inner.context = None;
            report
        };

        tracing::error!(plugin = %failure.plugin, "{}", failure.message);
        self.emit(&LifecycleEvent::Failed { failure });
    }

    fn live_context(&self, operation: &'static str) -> Result<Arc<InterpreterContext>> {
        let inner = self.inner.read();
        match (&inner.context, inner.info.state.has_context()) {
            (Some(context), true) => Ok(context.clone()),
            _ => Err(Error::invalid_transition(operation, inner.info.state)),
        }
    }

    /// Reserve the plugin for a hook call and enter `Looping` on the first step.
    fn begin(
        &self,
        operation: &'static str,
        allowed: fn(&PluginState) -> bool,
    ) -> Result<Arc<InterpreterContext>> {
        let (context, entered_looping) = {
            let mut inner = self.inner.write();
            let state = inner.info.state;
            if inner.busy || !allowed(&state) {
                return Err(Error::invalid_transition(operation, state));
            }
            let context = inner
                .context
                .clone()
                .ok_or_else(|| Error::invalid_transition(operation, state))?;

            inner.busy = true;
            let entered_looping = operation == "step" && state == PluginState::Initialized;
            if operation == "step" {
                inner.info.step_count += 1;
                inner.info.state = PluginState::Looping;
            }
            (context, entered_looping)
        };

        if entered_looping {
            tracing::info!(plugin = %self.name(), "looping");
            self.emit_entered(PluginState::Looping);
        }
        Ok(context)
    }

    /// Commit the outcome of a hook call to the state machine.
    fn finish<T>(&self, result: Result<T>, success: PluginState) -> Result<T> {
        let mut failure = None;
        let mut entered = None;
        {
            let mut inner = self.inner.write();
            inner.busy = false;
            let state = inner.info.state;

            match &result {
                // a concurrent stop already decided the outcome
                _ if state.is_terminal() => {}
                Ok(_) => {
                    if state != success {
                        inner.info.state = success;
                        entered = Some(success);
                    }
                    if success == PluginState::Loaded {
                        inner.info.loaded_at = Some(Instant::now());
                    }
                }
                Err(Error::Interrupted) => {
                    inner.info.state = PluginState::Stopped;
                    inner.context = None;
                    entered = Some(PluginState::Stopped);
                }
                Err(err) if err.fails_plugin() => {
                    let report = PluginFailure::new(self.name(), state, err);
                    inner.info.state = PluginState::Failed;
                    inner.info.last_failure = Some(report.clone());
                    inner.context = None;
                    failure = Some(report);
                }
                Err(_) => {}
            }
        }

        if let Some(state) = entered {
            tracing::info!(plugin = %self.name(), %state, "lifecycle transition");
            self.emit_entered(state);
        }
        if let Some(failure) = failure {
            tracing::warn!(
                plugin = %failure.plugin,
                state = %failure.state,
                code = failure.code,
                "{}",
                failure.message
            );
            self.emit(&LifecycleEvent::Failed { failure });
        }

        result
    }

    fn emit_entered(&self, state: PluginState) {
        if let Some(event) = LifecycleEvent::entered(state, self.name()) {
            self.emit(&event);
        }
    }

    fn emit(&self, event: &LifecycleEvent) {
        if let Some(hooks) = &self.hooks {
            hooks.read().emit(event);
        }
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Plugin")
            .field("id", &inner.info.id)
            .field("name", &self.descriptor.name)
            .field("state", &inner.info.state)
            .finish()
    }
}

/// Handle to a plugin for safe concurrent access.
#[derive(Clone)]
pub struct PluginHandle {
    plugin: Arc<Plugin>,
}

impl PluginHandle {
    /// Create a new plugin handle.
    pub fn new(plugin: Plugin) -> Self {
        Self {
            plugin: Arc::new(plugin),
        }
    }

    /// Get the plugin ID.
    pub fn id(&self) -> u64 {
        self.plugin.id()
    }

    /// Get the plugin name.
    pub fn name(&self) -> String {
        self.plugin.name().to_string()
    }

    /// Get the plugin state.
    pub fn state(&self) -> PluginState {
        self.plugin.state()
    }

    /// Get plugin info.
    pub fn info(&self) -> PluginInfo {
        self.plugin.info()
    }

    /// Call a function on the plugin.
    pub fn call(&self, function: &str, args: &[HostValue]) -> Result<HostValue> {
        self.plugin.call(function, args)
    }

    /// Read a global of the plugin.
    pub fn global(&self, name: &str) -> Result<HostValue> {
        self.plugin.global(name)
    }

    /// Get the underlying plugin.
    pub fn inner(&self) -> &Plugin {
        &self.plugin
    }
}

impl std::ops::Deref for PluginHandle {
    type Target = Plugin;

    fn deref(&self) -> &Plugin {
        &self.plugin
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("id", &self.id())
            .field("name", &self.plugin.name())
            .field("state", &self.state())
            .finish()
    }
}
