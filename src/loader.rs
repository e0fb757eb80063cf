//! Plugin loading from source text, files and directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::builtins::OutputHook;
use crate::context::ContextConfig;
use crate::error::Result;
use crate::lifecycle::{LifecycleHooks, SharedHooks};
use crate::lock::ExecutionLock;
use crate::plugin::{Plugin, PluginDescriptor, PluginHandle};

/// Configuration for the plugin loader.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LoaderConfig {
    /// File extension of plugin scripts, without the dot.
    pub extension: String,
    /// Whether directory loading descends into subdirectories.
    pub recursive: bool,
    /// Base path for resolving relative paths.
    pub base_path: Option<PathBuf>,
    /// Whether to run top-level code right after creating a plugin.
    pub auto_load: bool,
    /// Interpreter settings for every plugin context.
    pub context: ContextConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            extension: "rhai".to_string(),
            recursive: true,
            base_path: None,
            auto_load: true,
            context: ContextConfig::default(),
        }
    }
}

impl LoaderConfig {
    /// Create a new loader configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the interpreter context configuration.
    pub fn with_context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    /// Set the script file extension.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Set recursive directory loading.
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Set the base path.
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Set auto-load behavior.
    pub fn with_auto_load(mut self, auto_load: bool) -> Self {
        self.auto_load = auto_load;
        self
    }
}

/// Creates plugins that share one execution lock and one set of hooks.
pub struct PluginLoader {
    config: LoaderConfig,
    lock: Arc<ExecutionLock>,
    hooks: SharedHooks,
    output: RwLock<Option<OutputHook>>,
}

impl PluginLoader {
    /// Create a new plugin loader.
    pub fn new(config: LoaderConfig, lock: Arc<ExecutionLock>) -> Self {
        Self {
            config,
            lock,
            hooks: Arc::new(RwLock::new(LifecycleHooks::new())),
            output: RwLock::new(None),
        }
    }

    /// Deliver lifecycle events of created plugins to `hooks`.
    pub fn with_hooks(mut self, hooks: SharedHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Get the loader configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Get the hooks attached to created plugins.
    pub fn hooks(&self) -> &SharedHooks {
        &self.hooks
    }

    /// Route script output of plugins created from now on to `hook`.
    pub fn on_output<F>(&self, hook: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        *self.output.write() = Some(Arc::new(hook));
    }

    /// Create an unloaded plugin.
    pub fn create(&self, descriptor: PluginDescriptor) -> PluginHandle {
        let mut plugin = Plugin::new(descriptor, self.config.context.clone(), self.lock.clone())
            .with_hooks(self.hooks.clone());
        if let Some(hook) = self.output.read().clone() {
            plugin = plugin.with_output(hook);
        }
        PluginHandle::new(plugin)
    }

    /// Create a plugin from source text.
    pub fn load_source(&self, name: impl Into<String>, source: impl Into<String>) -> Result<PluginHandle> {
        self.load_descriptor(PluginDescriptor::new(name, source))
    }

    /// Create a plugin from a script file, named after the file stem.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<PluginHandle> {
        self.load_descriptor(self.read_descriptor(path)?)
    }

    /// Read a script file into a descriptor, resolving relative paths
    /// against the base path.
    pub fn read_descriptor(&self, path: impl AsRef<Path>) -> Result<PluginDescriptor> {
        PluginDescriptor::from_file(self.resolve_path(path.as_ref()))
    }

    /// Create a plugin for every script under `dir`.
    ///
    /// Scripts that fail to read or load are logged and skipped.
    pub fn load_dir(&self, dir: impl AsRef<Path>) -> Result<Vec<PluginHandle>> {
        let mut loaded = Vec::new();

        for path in self.scan(dir)? {
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

        Ok(loaded)
    }

    /// List script files under `dir` in sorted order.
    pub fn scan(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        self.scan_into(&self.resolve_path(dir.as_ref()), &mut found)?;
        found.sort();
        Ok(found)
    }

    fn scan_into(&self, dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                if self.config.recursive {
                    self.scan_into(&path, found)?;
                }
            } else if path.extension().is_some_and(|ext| ext == self.config.extension.as_str()) {
                found.push(path);
            }
        }
        Ok(())
    }

    /// Create a plugin from `descriptor`, loading it if `auto_load` is set.
    pub fn load_descriptor(&self, descriptor: PluginDescriptor) -> Result<PluginHandle> {
        let plugin = self.create(descriptor);
        if self.config.auto_load {
            plugin.load()?;
        }
        Ok(plugin)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(ref base) = self.config.base_path {
            base.join(path)
        } else {
            path.to_path_buf()
        }
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("config", &self.config)
            .finish()
    }
}
