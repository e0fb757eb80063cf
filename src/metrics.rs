//! Prometheus metrics integration for plugin runtime.

use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

use crate::error::{Error, Result};
use crate::lifecycle::LifecycleEvent;
use crate::lock::LockStats;

/// Configuration for plugin metrics collection.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Metric prefix for all plugin metrics.
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: "rhai_plugin".to_string(),
        }
    }
}

impl MetricsConfig {
    /// Create a new metrics configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the metric prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Plugin metrics collector.
pub struct PluginMetrics {
    config: MetricsConfig,
    registry: Registry,
    events: IntCounterVec,
    failures: IntCounterVec,
    lock_acquisitions: IntGauge,
    lock_contended: IntGauge,
    lock_timeouts: IntGauge,
}

fn metrics_err(e: prometheus::Error) -> Error {
    Error::Metrics(e.to_string())
}

impl PluginMetrics {
    /// Create a new metrics collector with the given configuration.
    pub fn new(config: MetricsConfig) -> Result<Self> {
        let registry = Registry::new();
        let prefix = &config.prefix;

        let events = IntCounterVec::new(
            Opts::new(
                format!("{}_lifecycle_events_total", prefix),
                "Lifecycle transitions by event",
            ),
            &["event"],
        )
        .map_err(metrics_err)?;

        let failures = IntCounterVec::new(
            Opts::new(
                format!("{}_failures_total", prefix),
                "Plugin failures by error code",
            ),
            &["code"],
        )
        .map_err(metrics_err)?;

        let lock_acquisitions = IntGauge::new(
            format!("{}_lock_acquisitions", prefix),
            "Execution lock acquisitions",
        )
        .map_err(metrics_err)?;

        let lock_contended = IntGauge::new(
            format!("{}_lock_contended", prefix),
            "Execution lock acquisitions that had to wait",
        )
        .map_err(metrics_err)?;

        let lock_timeouts = IntGauge::new(
            format!("{}_lock_timeouts", prefix),
            "Execution lock acquisitions that timed out",
        )
        .map_err(metrics_err)?;

        registry.register(Box::new(events.clone())).map_err(metrics_err)?;
        registry.register(Box::new(failures.clone())).map_err(metrics_err)?;
        registry
            .register(Box::new(lock_acquisitions.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(lock_contended.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(lock_timeouts.clone()))
            .map_err(metrics_err)?;

        Ok(Self {
            config,
            registry,
            events,
            failures,
            lock_acquisitions,
            lock_contended,
            lock_timeouts,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Get the Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Count a lifecycle event.
    pub fn record(&self, event: &LifecycleEvent) {
        self.events.with_label_values(&[event.event_name()]).inc();
        if let LifecycleEvent::Failed { failure } = event {
            self.failures.with_label_values(&[failure.code]).inc();
        }
    }

    /// Publish execution lock counters.
    pub fn record_lock_stats(&self, stats: LockStats) {
        self.lock_acquisitions.set(stats.acquisitions as i64);
        self.lock_contended.set(stats.contended as i64);
        self.lock_timeouts.set(stats.timeouts as i64);
    }

    /// Get the number of recorded events with the given name.
    pub fn events_total(&self, event: &str) -> u64 {
        self.events.with_label_values(&[event]).get()
    }

    /// Get the number of recorded failures with the given error code.
    pub fn failures_total(&self, code: &str) -> u64 {
        self.failures.with_label_values(&[code]).get()
    }
}

impl std::fmt::Debug for PluginMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginMetrics")
            .field("config", &self.config)
            .field("loaded", &self.events_total("loaded"))
            .field("failed", &self.events_total("failed"))
            .finish()
    }
}
