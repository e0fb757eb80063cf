//! # rhai-plugin-runtime
//!
//! Embedded Rhai plugin runtime with exact value marshalling, a
//! `load → initialize → step` lifecycle, and a global execution lock that
//! lets plugins run on their own threads without ever executing script code
//! at the same time.
//!
//! This crate provides:
//! - **Value Bridge** - Convert host values to interpreter values and back
//! - **Interpreter Context** - One isolated interpreter per plugin
//! - **Lifecycle Management** - Load, initialize, step, stop and retry plugins
//! - **Execution Scheduler** - One thread per plugin behind a shared lock
//! - **Diagnostics** - Typed errors and failure reports with error codes
//! - **Metrics Hooks** - Track lifecycle events and lock contention
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rhai_plugin_runtime::{HostValue, PluginRuntime, RuntimeConfig};
//!
//! # fn main() -> rhai_plugin_runtime::Result<()> {
//! let runtime = PluginRuntime::new(RuntimeConfig::default())?;
//!
//! runtime.load_source(
//!     "counter",
//!     r#"
//!         fn initialize(n) { print(`counter ${n} ready`); }
//!         fn step(tag) { loop { print(tag); sleep(1); } }
//!     "#,
//! )?;
//!
//! runtime.start("counter", HostValue::from(0), HostValue::from("0"))?;
//! std::thread::sleep(std::time::Duration::from_secs(3));
//! runtime.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): TOML configuration files and JSON value conversion
//! - `metrics-prometheus`: Prometheus metrics integration

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod bridge;
mod builtins;
mod context;
mod diagnostics;
mod error;
mod globals;
mod lifecycle;
mod loader;
mod lock;
mod plugin;
mod registry;
mod runtime;
mod scheduler;
mod value;

#[cfg(feature = "metrics-prometheus")]
mod metrics;

pub use bridge::{into_interpreter, to_arguments, to_host, to_interpreter, InterpreterValue};
pub use builtins::OutputHook;
pub use context::{ContextConfig, InterpreterContext};
pub use diagnostics::PluginFailure;
pub use error::{Error, Result};
pub use globals::GlobalsTable;
pub use lifecycle::{LifecycleEvent, LifecycleHooks, PluginState, SharedHooks};
pub use loader::{LoaderConfig, PluginLoader};
pub use lock::{CancelToken, ExecutionLock, ExecutionPermit, LockMode, LockStats};
pub use plugin::{Plugin, PluginDescriptor, PluginHandle, PluginInfo, INITIALIZE, LOOP};
pub use registry::{PluginRegistry, RegistryConfig, RegistryStats};
pub use runtime::{PluginRuntime, RuntimeConfig};
pub use scheduler::{Scheduler, SchedulerConfig, TaskReport};
pub use value::{HostValue, ValueKind};

#[cfg(feature = "metrics-prometheus")]
pub use metrics::{MetricsConfig, PluginMetrics};

// Re-export the interpreter for hosts that need its types directly
pub use rhai;

/// Crate version for compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
