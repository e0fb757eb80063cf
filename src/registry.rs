//! Plugin registry for managing loaded plugins.

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::lifecycle::PluginState;
use crate::plugin::{PluginHandle, PluginInfo};

/// Configuration for the plugin registry.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RegistryConfig {
    /// Maximum number of plugins allowed.
    pub max_plugins: usize,
    /// Whether to allow plugin overwrites.
    pub allow_overwrite: bool,
    /// Whether cleanup also removes failed plugins.
    pub cleanup_failed: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_plugins: 100,
            allow_overwrite: false,
            cleanup_failed: false,
        }
    }
}

impl RegistryConfig {
    /// Create a new registry configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of plugins.
    pub fn with_max_plugins(mut self, max: usize) -> Self {
        self.max_plugins = max;
        self
    }

    /// Allow plugin overwrites.
    pub fn with_allow_overwrite(mut self, allow: bool) -> Self {
        self.allow_overwrite = allow;
        self
    }

    /// Remove failed plugins on cleanup instead of keeping them for a retry.
    pub fn with_cleanup_failed(mut self, cleanup: bool) -> Self {
        self.cleanup_failed = cleanup;
        self
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Total plugins registered.
    pub total: usize,
    /// Plugins not yet loaded.
    pub unloaded: usize,
    /// Plugins loaded but not initialized.
    pub loaded: usize,
    /// Plugins initialized.
    pub initialized: usize,
    /// Plugins looping.
    pub looping: usize,
    /// Plugins failed.
    pub failed: usize,
    /// Plugins stopped.
    pub stopped: usize,
}

/// Plugin registry for managing loaded plugins.
pub struct PluginRegistry {
    config: RegistryConfig,
    plugins: DashMap<String, PluginHandle>,
}

impl PluginRegistry {
    /// Create a new plugin registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            plugins: DashMap::new(),
        }
    }

    /// Create with default configuration.
    pub fn default_config() -> Self {
        Self::new(RegistryConfig::default())
    }

    /// Get the registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a plugin.
    /// Check that a plugin named `name` could be registered right now.
    pub fn check_available(&self, name: &str) -> Result<()> {
        if self.plugins.contains_key(name) {
            if !self.config.allow_overwrite {
                return Err(Error::PluginAlreadyLoaded(name.to_string()));
            }
        } else if self.plugins.len() >= self.config.max_plugins {
            return Err(self.full());
        }
        Ok(())
    }

    fn full(&self) -> Error {
        Error::Registry(format!("registry full: max {} plugins", self.config.max_plugins))
    }

    pub fn register(&self, plugin: PluginHandle) -> Result<()> {
        let name = plugin.name();

        if self.plugins.contains_key(&name) {
            if !self.config.allow_overwrite {
                return Err(Error::PluginAlreadyLoaded(name));
            }
            if let Some((_, existing)) = self.plugins.remove(&name) {
                let _ = existing.stop();
            }
        } else if self.plugins.len() >= self.config.max_plugins {
            return Err(self.full());
        }

        tracing::debug!(plugin = %name, "registered");
        self.plugins.insert(name, plugin);
        Ok(())
    }

    /// Unregister a plugin by name, stopping it if it is still live.
    pub fn unregister(&self, name: &str) -> Result<PluginHandle> {
        let (_, plugin) = self
            .plugins
            .remove(name)
            .ok_or_else(|| Error::plugin_not_found(name))?;

        if !plugin.state().is_terminal() {
            let _ = plugin.stop();
        }
        Ok(plugin)
    }

    /// Get a plugin by name.
    pub fn get(&self, name: &str) -> Option<PluginHandle> {
        self.plugins.get(name).map(|r| r.clone())
    }

    /// Check if a plugin exists.
    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Get all plugin names.
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|r| r.key().clone()).collect()
    }

    /// Get all plugins.
    pub fn all(&self) -> Vec<PluginHandle> {
        self.plugins.iter().map(|r| r.value().clone()).collect()
    }

    /// Get plugins by state.
    pub fn by_state(&self, state: PluginState) -> Vec<PluginHandle> {
        self.plugins
            .iter()
            .filter(|r| r.state() == state)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Get looping plugins.
    pub fn looping(&self) -> Vec<PluginHandle> {
        self.by_state(PluginState::Looping)
    }

    /// Get plugin count.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Get registry statistics.
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total: self.plugins.len(),
            ..Default::default()
        };

        for entry in self.plugins.iter() {
            match entry.state() {
                PluginState::Unloaded => stats.unloaded += 1,
                PluginState::Loaded => stats.loaded += 1,
                PluginState::Initialized => stats.initialized += 1,
                PluginState::Looping => stats.looping += 1,
                PluginState::Failed => stats.failed += 1,
                PluginState::Stopped => stats.stopped += 1,
            }
        }

        stats
    }

    /// Get all plugin info.
    pub fn info(&self) -> Vec<PluginInfo> {
        self.plugins.iter().map(|r| r.info()).collect()
    }

    /// Stop all live plugins.
    pub fn stop_all(&self) -> Vec<Result<()>> {
        self.all()
            .into_iter()
            .filter(|p| !p.state().is_terminal())
            .map(|p| p.stop())
            .collect()
    }

    /// Remove stopped plugins, and failed ones if configured.
    pub fn cleanup(&self) -> usize {
        let to_remove: Vec<String> = self
            .plugins
            .iter()
            .filter(|r| match r.state() {
                PluginState::Stopped => true,
                PluginState::Failed => self.config.cleanup_failed,
                _ => false,
            })
            .map(|r| r.key().clone())
            .collect();

        let count = to_remove.len();
        for name in to_remove {
            self.plugins.remove(&name);
        }

        count
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("config", &self.config)
            .field("plugin_count", &self.plugins.len())
            .finish()
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::lock::ExecutionLock;
    use crate::plugin::{Plugin, PluginDescriptor};
    use std::sync::Arc;

    fn create_test_plugin(name: &str) -> PluginHandle {
        PluginHandle::new(Plugin::new(
            PluginDescriptor::new(name, "fn initialize(x) {} fn step(x) { x }"),
            ContextConfig::default(),
            Arc::new(ExecutionLock::default()),
        ))
    }

    #[test]
    fn test_registry_creation() {
        let registry = PluginRegistry::default_config();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_register_plugin() {
        let registry = PluginRegistry::default_config();
        registry.register(create_test_plugin("test-plugin")).unwrap();

        assert!(registry.contains("test-plugin"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_duplicate() {
        let registry = PluginRegistry::default_config();

        registry.register(create_test_plugin("test-plugin")).unwrap();
        let result = registry.register(create_test_plugin("test-plugin"));

        assert!(matches!(result, Err(Error::PluginAlreadyLoaded(_))));
    }

    #[test]
    fn test_register_duplicate_with_overwrite() {
        let registry = PluginRegistry::new(RegistryConfig::new().with_allow_overwrite(true));

        let plugin1 = create_test_plugin("test-plugin");
        plugin1.load().unwrap();
        let plugin2 = create_test_plugin("test-plugin");
        let id2 = plugin2.id();

        registry.register(plugin1.clone()).unwrap();
        registry.register(plugin2).unwrap();

        assert_eq!(registry.get("test-plugin").unwrap().id(), id2);
        assert_eq!(plugin1.state(), PluginState::Stopped);
    }

    #[test]
    fn test_unregister_plugin() {
        let registry = PluginRegistry::default_config();
        let plugin = create_test_plugin("test-plugin");
        plugin.load().unwrap();

        registry.register(plugin.clone()).unwrap();
        registry.unregister("test-plugin").unwrap();

        assert!(!registry.contains("test-plugin"));
        assert_eq!(plugin.state(), PluginState::Stopped);
        assert!(matches!(
            registry.unregister("test-plugin"),
            Err(Error::PluginNotFound(_))
        ));
    }

    #[test]
    fn test_registry_stats() {
        let registry = PluginRegistry::default_config();

        let looping = create_test_plugin("plugin-1");
        looping.load().unwrap();
        looping.initialize(Default::default()).unwrap();
        looping.step(Default::default()).unwrap();

        let failed = PluginHandle::new(Plugin::new(
            PluginDescriptor::new("plugin-2", "fn ("),
            ContextConfig::default(),
            Arc::new(ExecutionLock::default()),
        ));
        let _ = failed.load();

        registry.register(looping).unwrap();
        registry.register(failed).unwrap();
        registry.register(create_test_plugin("plugin-3")).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.looping, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.unloaded, 1);
        assert_eq!(registry.looping().len(), 1);
    }

    #[test]
    fn test_cleanup() {
        let registry = PluginRegistry::default_config();
        let a = create_test_plugin("a");
        let b = create_test_plugin("b");
        registry.register(a.clone()).unwrap();
        registry.register(b).unwrap();

        a.stop().unwrap();
        assert_eq!(registry.cleanup(), 1);
        assert_eq!(registry.names(), vec!["b".to_string()]);

        let results = registry.stop_all();
        assert_eq!(results.len(), 1);
        assert_eq!(registry.stats().stopped, 1);
    }

    #[test]
    fn test_max_plugins() {
        let registry = PluginRegistry::new(RegistryConfig::new().with_max_plugins(2));

        registry.register(create_test_plugin("plugin-1")).unwrap();
        registry.register(create_test_plugin("plugin-2")).unwrap();

        let result = registry.register(create_test_plugin("plugin-3"));
        assert!(matches!(result, Err(Error::Registry(_))));
    }
}
