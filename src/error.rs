//! Error types for plugin runtime operations.

use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::PluginState;
use crate::value::ValueKind;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during plugin operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Plugin source failed to parse, or its top-level code raised.
    #[error("load error: {0}")]
    Load(String),

    /// IO error while reading plugin source.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Callable or global absent.
    #[error("name not found: {0}")]
    NameNotFound(String),

    /// Map key absent.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Callable executed but raised an error.
    #[error("raised error: {0}")]
    Raised(String),

    /// Callable exists but not with the given number of arguments.
    #[error("arity mismatch: {name} accepts {expected:?} argument(s), got {given}")]
    ArityMismatch {
        /// Callable name.
        name: String,
        /// Arities the callable is defined with.
        expected: Vec<usize>,
        /// Number of arguments passed.
        given: usize,
    },

    /// Interpreter value with no host counterpart.
    #[error("unsupported kind: {0}")]
    UnsupportedKind(String),

    /// Host value of a different kind than requested.
    #[error("kind mismatch: expected {expected}, found {found}")]
    KindMismatch {
        /// Requested kind.
        expected: ValueKind,
        /// Actual kind.
        found: ValueKind,
    },

    /// Global declared as a constant.
    #[error("global is read-only: {0}")]
    ReadOnlyGlobal(String),

    /// Lifecycle operation invoked out of order.
    #[error("invalid transition: cannot {operation} a plugin in state {state}")]
    InvalidTransition {
        /// Requested operation.
        operation: &'static str,
        /// State the plugin was in.
        state: PluginState,
    },

    /// Bounded wait for the execution lock elapsed.
    #[error("timed out after {0:?} waiting for the execution lock")]
    LockTimeout(Duration),

    /// Execution was cancelled at a yield point.
    #[error("execution interrupted by stop request")]
    Interrupted,

    /// Plugin not found.
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    /// Plugin already loaded.
    #[error("plugin already loaded: {0}")]
    PluginAlreadyLoaded(String),

    /// Plugin already has a running task.
    #[error("plugin already scheduled: {0}")]
    AlreadyScheduled(String),

    /// Registry error.
    #[error("registry error: {0}")]
    Registry(String),

    /// Plugin built around a different execution lock than the scheduler's.
    #[error("plugin {0} does not share the scheduler's execution lock")]
    ForeignLock(String),

    /// JSON value failed to parse or render.
    #[cfg(feature = "serde")]
    #[error("json error: {0}")]
    Json(String),

    /// Configuration parse error.
    #[cfg(feature = "serde")]
    #[error("config error: {0}")]
    Config(String),

    /// Metrics registration error.
    #[cfg(feature = "metrics-prometheus")]
    #[error("metrics error: {0}")]
    Metrics(String),
}

impl Error {
    /// Create a load error.
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    /// Create a name not found error.
    pub fn name_not_found(name: impl Into<String>) -> Self {
        Self::NameNotFound(name.into())
    }

    /// Create a raised error.
    pub fn raised(msg: impl Into<String>) -> Self {
        Self::Raised(msg.into())
    }

    /// Create an unsupported kind error.
    pub fn unsupported_kind(type_name: impl Into<String>) -> Self {
        Self::UnsupportedKind(type_name.into())
    }

    /// Create an invalid transition error.
    pub fn invalid_transition(operation: &'static str, state: PluginState) -> Self {
        Self::InvalidTransition { operation, state }
    }

    /// Create a plugin not found error.
    pub fn plugin_not_found(name: impl Into<String>) -> Self {
        Self::PluginNotFound(name.into())
    }

    /// Short stable code naming the error category.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Load(_) | Self::Io(_) => "load-error",
            Self::NameNotFound(_) => "name-not-found",
            Self::KeyNotFound(_) => "key-not-found",
            Self::Raised(_) => "raised-error",
            Self::ArityMismatch { .. } => "arity-mismatch",
            Self::UnsupportedKind(_) => "unsupported-kind",
            Self::KindMismatch { .. } => "kind-mismatch",
            Self::ReadOnlyGlobal(_) => "read-only-global",
            Self::InvalidTransition { .. } => "invalid-transition",
            Self::LockTimeout(_) => "lock-timeout",
            Self::Interrupted => "interrupted",
            Self::PluginNotFound(_) => "plugin-not-found",
            Self::PluginAlreadyLoaded(_) => "plugin-already-loaded",
            Self::AlreadyScheduled(_) => "already-scheduled",
            Self::Registry(_) => "registry",
            Self::ForeignLock(_) => "foreign-lock",
            #[cfg(feature = "serde")]
            Self::Json(_) => "json",
            #[cfg(feature = "serde")]
            Self::Config(_) => "config",
            #[cfg(feature = "metrics-prometheus")]
            Self::Metrics(_) => "metrics",
        }
    }

    /// Returns true for failures of an executed callable.
    pub fn is_call_error(&self) -> bool {
        matches!(
            self,
            Self::Raised(_) | Self::ArityMismatch { .. } | Self::UnsupportedKind(_)
        )
    }

    /// Returns true if this error moves a plugin to `Failed` when raised by a
    /// lifecycle hook.
    ///
    /// Rejected transitions leave the plugin untouched and interruptions stop it.
    pub fn fails_plugin(&self) -> bool {
        !matches!(self, Self::InvalidTransition { .. } | Self::Interrupted)
    }
}
