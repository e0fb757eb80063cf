//! Plugin lifecycle states and events.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::diagnostics::PluginFailure;

/// Hooks shared between a runtime and the plugins it creates.
pub type SharedHooks = Arc<RwLock<LifecycleHooks>>;

/// Plugin lifecycle state.
///
/// `Unloaded → Loaded → Initialized → Looping`, ending in `Failed` or
/// `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    /// Plugin source has not been executed.
    Unloaded,
    /// Top-level code ran successfully.
    Loaded,
    /// `initialize` returned successfully.
    Initialized,
    /// `loop` has been invoked at least once.
    Looping,
    /// A lifecycle call raised an error.
    Failed,
    /// Stop was requested.
    Stopped,
}

impl PluginState {
    /// Check if the plugin can be loaded. Failed plugins may be retried.
    pub fn can_load(&self) -> bool {
        matches!(self, Self::Unloaded | Self::Failed)
    }

    /// Check if `initialize` may be called.
    pub fn can_initialize(&self) -> bool {
        matches!(self, Self::Loaded)
    }

    /// Check if `loop` may be called.
    pub fn can_step(&self) -> bool {
        matches!(self, Self::Initialized | Self::Looping)
    }

    /// Check if the plugin has a live interpreter context.
    pub fn has_context(&self) -> bool {
        matches!(self, Self::Loaded | Self::Initialized | Self::Looping)
    }

    /// Check if the plugin is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unloaded => "Plugin source not yet executed",
            Self::Loaded => "Plugin loaded and waiting for initialize",
            Self::Initialized => "Plugin initialized and ready to loop",
            Self::Looping => "Plugin loop running",
            Self::Failed => "Plugin failed",
            Self::Stopped => "Plugin stopped",
        }
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Initialized => "initialized",
            Self::Looping => "looping",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle event for hooks.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Top-level code ran.
    Loaded {
        /// Plugin name.
        name: String,
        /// Load time.
        at: Instant,
    },
    /// `initialize` returned.
    Initialized {
        /// Plugin name.
        name: String,
        /// Initialization time.
        at: Instant,
    },
    /// First `loop` invocation started.
    Looping {
        /// Plugin name.
        name: String,
        /// Start time.
        at: Instant,
    },
    /// A lifecycle call failed.
    Failed {
        /// Failure report.
        failure: PluginFailure,
    },
    /// Plugin was stopped.
    Stopped {
        /// Plugin name.
        name: String,
        /// Stop time.
        at: Instant,
    },
}

impl LifecycleEvent {
    /// Get the plugin name.
    pub fn plugin_name(&self) -> &str {
        match self {
            Self::Loaded { name, .. } => name,
            Self::Initialized { name, .. } => name,
            Self::Looping { name, .. } => name,
            Self::Failed { failure } => &failure.plugin,
            Self::Stopped { name, .. } => name,
        }
    }

    /// Get the event timestamp.
    pub fn timestamp(&self) -> Instant {
        match self {
            Self::Loaded { at, .. } => *at,
            Self::Initialized { at, .. } => *at,
            Self::Looping { at, .. } => *at,
            Self::Failed { failure } => failure.at,
            Self::Stopped { at, .. } => *at,
        }
    }

    /// Get the event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Loaded { .. } => "loaded",
            Self::Initialized { .. } => "initialized",
            Self::Looping { .. } => "looping",
            Self::Failed { .. } => "failed",
            Self::Stopped { .. } => "stopped",
        }
    }

    /// Get the state the plugin entered.
    pub fn state(&self) -> PluginState {
        match self {
            Self::Loaded { .. } => PluginState::Loaded,
            Self::Initialized { .. } => PluginState::Initialized,
            Self::Looping { .. } => PluginState::Looping,
            Self::Failed { .. } => PluginState::Failed,
            Self::Stopped { .. } => PluginState::Stopped,
        }
    }

    pub(crate) fn entered(state: PluginState, name: &str) -> Option<Self> {
        let name = name.to_string();
        let at = Instant::now();
        match state {
            PluginState::Loaded => Some(Self::Loaded { name, at }),
            PluginState::Initialized => Some(Self::Initialized { name, at }),
            PluginState::Looping => Some(Self::Looping { name, at }),
            PluginState::Stopped => Some(Self::Stopped { name, at }),
            PluginState::Unloaded | PluginState::Failed => None,
        }
    }
}

/// Hooks for lifecycle events.
pub struct LifecycleHooks {
    handlers: Vec<Box<dyn Fn(&LifecycleEvent) + Send + Sync>>,
}

impl LifecycleHooks {
    /// Create new lifecycle hooks.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a lifecycle event handler.
    pub fn on_event<F>(&mut self, handler: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    /// Emit a lifecycle event.
    pub fn emit(&self, event: &LifecycleEvent) {
        for handler in &self.handlers {
            handler(event);
        }
    }

    /// Get the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for LifecycleHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("handler_count", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_lifecycle_state_transitions() {
        assert!(PluginState::Unloaded.can_load());
        assert!(PluginState::Failed.can_load());
        assert!(!PluginState::Stopped.can_load());
        assert!(!PluginState::Loaded.can_load());

        assert!(PluginState::Loaded.can_initialize());
        assert!(!PluginState::Initialized.can_initialize());

        assert!(PluginState::Initialized.can_step());
        assert!(PluginState::Looping.can_step());
        assert!(!PluginState::Loaded.can_step());

        assert!(PluginState::Failed.is_terminal());
        assert!(PluginState::Stopped.is_terminal());
        assert!(!PluginState::Looping.is_terminal());
    }

    #[test]
    fn test_lifecycle_hooks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let mut hooks = LifecycleHooks::new();
        hooks.on_event(move |_| {
            counter_clone.fetch_add(1, Ordering::Relaxed);
        });

        for state in [PluginState::Loaded, PluginState::Initialized, PluginState::Stopped] {
            if let Some(event) = LifecycleEvent::entered(state, "test") {
                hooks.emit(&event);
            }
        }

        assert_eq!(counter.load(Ordering::Relaxed), 3);
        assert_eq!(hooks.len(), 1);
    }

    #[test]
    fn test_lifecycle_event_info() {
        let event = LifecycleEvent::entered(PluginState::Looping, "test-plugin").unwrap();

        assert_eq!(event.plugin_name(), "test-plugin");
        assert_eq!(event.event_name(), "looping");
        assert_eq!(event.state(), PluginState::Looping);
        assert!(LifecycleEvent::entered(PluginState::Failed, "x").is_none());
    }
}
