//! Plugin runtime tying together loading, registry and scheduling.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleEvent, LifecycleHooks, SharedHooks};
use crate::loader::{LoaderConfig, PluginLoader};
use crate::lock::LockStats;
use crate::plugin::{PluginDescriptor, PluginHandle};
use crate::registry::{PluginRegistry, RegistryConfig, RegistryStats};
use crate::scheduler::{Scheduler, SchedulerConfig, TaskReport};
use crate::value::HostValue;

#[cfg(feature = "metrics-prometheus")]
use crate::metrics::PluginMetrics;

/// Configuration for the plugin runtime.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RuntimeConfig {
    /// Plugin directories to scan.
    pub plugin_dirs: Vec<PathBuf>,
    /// Whether to discover plugins when the runtime is created.
    pub auto_discover: bool,
    /// Loader configuration.
    pub loader: LoaderConfig,
    /// Registry configuration.
    pub registry: RegistryConfig,
    /// Scheduler configuration.
    pub scheduler: SchedulerConfig,
}

impl RuntimeConfig {
    /// Create a new runtime configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the loader configuration.
    pub fn with_loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }

    /// Set the registry configuration.
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Set the scheduler configuration.
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Add a plugin directory.
    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_dirs.push(dir.into());
        self
    }

    /// Enable auto-discovery.
    pub fn with_auto_discover(mut self, auto: bool) -> Self {
        self.auto_discover = auto;
        self
    }

    /// Parse a configuration from TOML.
    #[cfg(feature = "serde")]
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read a TOML configuration file.
    #[cfg(feature = "serde")]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Serialize the configuration to TOML.
    #[cfg(feature = "serde")]
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Plugin runtime for managing plugins.
pub struct PluginRuntime {
    config: RuntimeConfig,
    scheduler: Scheduler,
    loader: PluginLoader,
    registry: PluginRegistry,
    hooks: SharedHooks,
    #[cfg(feature = "metrics-prometheus")]
    metrics: Option<Arc<PluginMetrics>>,
}

impl PluginRuntime {
    /// Create a new plugin runtime.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let scheduler = Scheduler::new(config.scheduler.clone());
        let hooks: SharedHooks = Arc::new(RwLock::new(LifecycleHooks::new()));
        let loader = PluginLoader::new(config.loader.clone(), scheduler.lock().clone())
            .with_hooks(hooks.clone());
        let registry = PluginRegistry::new(config.registry.clone());

        let runtime = Self {
            config,
            scheduler,
            loader,
            registry,
            hooks,
            #[cfg(feature = "metrics-prometheus")]
            metrics: None,
        };

        if runtime.config.auto_discover {
            runtime.discover()?;
        }
        Ok(runtime)
    }

    /// Create with default configuration.
    pub fn default_config() -> Result<Self> {
        Self::new(RuntimeConfig::default())
    }

    /// Record lifecycle events and lock counters in `metrics`.
    #[cfg(feature = "metrics-prometheus")]
    pub fn with_metrics(mut self, metrics: Arc<PluginMetrics>) -> Self {
        let recorder = metrics.clone();
        self.on_event(move |event| recorder.record(event));
        self.metrics = Some(metrics);
        self
    }

    /// Get the runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Get the plugin loader.
    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    /// Get the plugin registry.
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Get the scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Add a lifecycle event handler.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.hooks.write().on_event(handler);
    }

    /// Route script output of plugins loaded from now on to `hook`.
    pub fn on_output<F>(&self, hook: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.loader.on_output(hook);
    }

    /// Load and register a plugin from source text.
    ///
    /// The name is checked against the registry before any script code runs.
    pub fn load_source(&self, name: impl Into<String>, source: impl Into<String>) -> Result<PluginHandle> {
        self.admit(PluginDescriptor::new(name, source))
    }

    /// Load and register a plugin from a script file.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<PluginHandle> {
        self.admit(self.loader.read_descriptor(path)?)
    }

    /// Discover and load plugins from configured directories.
    ///
    /// Scripts that fail to read, load or register are logged and skipped.
    pub fn discover(&self) -> Result<Vec<PluginHandle>> {
        let mut loaded = Vec::new();

        for dir in &self.config.plugin_dirs {
            if !dir.exists() {
                tracing::warn!("Plugin directory does not exist: {}", dir.display());
                continue;
            }

            for path in self.loader.scan(dir)? {
                match self.load_file(&path) {
                    Ok(plugin) => {
                        tracing::info!("Loaded plugin {} from {}", plugin.name(), path.display());
                        loaded.push(plugin);
                    }
                    Err(e) => {
                        tracing::error!("Failed to load plugin from {}: {}", path.display(), e);
                    }
                }
            }
        }

        Ok(loaded)
    }

    fn admit(&self, descriptor: PluginDescriptor) -> Result<PluginHandle> {
        self.registry.check_available(&descriptor.name)?;

        let plugin = self.loader.load_descriptor(descriptor)?;
        if let Err(e) = self.registry.register(plugin.clone()) {
            // lost a race for the name or the last slot
            let _ = plugin.stop();
            return Err(e);
        }
        Ok(plugin)
    }

    /// Unregister a plugin by name, stopping it first.
    pub fn unload(&self, name: &str) -> Result<()> {
        let _ = self.scheduler.stop(name);
        self.registry.unregister(name)?;
        Ok(())
    }

    /// Get a plugin by name.
    pub fn get(&self, name: &str) -> Option<PluginHandle> {
        self.registry.get(name)
    }

    /// Check if a plugin is registered.
    pub fn has_plugin(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Get all registered plugins.
    pub fn plugins(&self) -> Vec<PluginHandle> {
        self.registry.all()
    }

    /// Get plugin count.
    pub fn plugin_count(&self) -> usize {
        self.registry.len()
    }

    /// Get registry statistics.
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Get execution lock counters.
    pub fn lock_stats(&self) -> LockStats {
        let stats = self.scheduler.lock_stats();
        #[cfg(feature = "metrics-prometheus")]
        if let Some(metrics) = &self.metrics {
            metrics.record_lock_stats(stats);
        }
        stats
    }

    /// Run a plugin on its own thread.
    pub fn start(&self, name: &str, init_arg: HostValue, loop_arg: HostValue) -> Result<()> {
        let plugin = self
            .registry
            .get(name)
            .ok_or_else(|| Error::plugin_not_found(name))?;

        self.scheduler.spawn(plugin, init_arg, loop_arg)
    }

    /// Run every registered plugin that is not yet running.
    ///
    /// Plugins are started in name order; `args` receives each plugin's
    /// position in that order and returns its `(initialize, loop)` arguments.
    pub fn start_all<F>(&self, args: F) -> Vec<(String, Result<()>)>
    where
        F: Fn(usize, &PluginHandle) -> (HostValue, HostValue),
    {
        let mut plugins = self.registry.all();
        plugins.sort_by_key(|p| p.name());

        plugins
            .into_iter()
            .filter(|p| !self.scheduler.is_running(&p.name()))
            .enumerate()
            .map(|(index, plugin)| {
                let name = plugin.name();
                let (init_arg, loop_arg) = args(index, &plugin);
                (name, self.scheduler.spawn(plugin, init_arg, loop_arg))
            })
            .collect()
    }

    /// Stop a plugin, running or not.
    pub fn stop(&self, name: &str) -> Result<()> {
        let plugin = self
            .registry
            .get(name)
            .ok_or_else(|| Error::plugin_not_found(name))?;

        match self.scheduler.stop(name) {
            Err(Error::PluginNotFound(_)) => plugin.stop(),
            other => other,
        }
    }

    /// Stop all plugins.
    pub fn stop_all(&self) {
        self.scheduler.stop_all();
        self.registry.stop_all();
    }

    /// Wait for a running plugin to finish.
    pub fn join(&self, name: &str) -> Result<TaskReport> {
        self.scheduler.join(name)
    }

    /// Wait for all running plugins to finish.
    pub fn join_all(&self) -> Vec<TaskReport> {
        self.scheduler.join_all()
    }

    /// Call a function on a plugin.
    pub fn call(&self, plugin_name: &str, function: &str, args: &[HostValue]) -> Result<HostValue> {
        let plugin = self
            .registry
            .get(plugin_name)
            .ok_or_else(|| Error::plugin_not_found(plugin_name))?;

        plugin.call(function, args)
    }

    /// Read a global of a plugin.
    pub fn global(&self, plugin_name: &str, name: &str) -> Result<HostValue> {
        let plugin = self
            .registry
            .get(plugin_name)
            .ok_or_else(|| Error::plugin_not_found(plugin_name))?;

        plugin.global(name)
    }

    /// Remove stopped plugins.
    pub fn cleanup(&self) -> usize {
        self.registry.cleanup()
    }

    /// Stop every plugin and wait for their threads.
    ///
    /// A plugin computing without reaching a yield point delays this until it
    /// does.
    pub fn shutdown(&self) -> Vec<TaskReport> {
        self.stop_all();
        self.join_all()
    }
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("config", &self.config)
            .field("plugin_count", &self.registry.len())
            .field("running", &self.scheduler.running().len())
            .finish()
    }
}

impl Drop for PluginRuntime {
    fn drop(&mut self) {
        self.stop_all();
    }
}
