//! Prometheus metrics for the stride-rs runtime.
//!
//! Counters work standalone without a Registry - registration is only needed
//! for exposition (scraping). Hot-path updates are direct field access, no
//! lookups.

use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Prometheus metrics for the stride-rs runtime.
///
/// Counters are always incremented (atomic ops only). Registration to a
/// Registry is optional - only needed for exposition.
#[derive(Clone)]
pub struct StrideMetrics {
    // === Gauges (current values) ===
    /// Loop invocations currently executing
    pub loops_in_flight: IntGauge,

    /// Worker threads in the pool
    pub worker_threads: IntGauge,

    // === Counters (cumulative) ===
    /// Loop invocations started
    pub loops_started: IntCounter,

    /// Loop invocations that returned success
    pub loops_completed: IntCounter,

    /// Loop invocations that returned an error
    pub loops_failed: IntCounter,

    /// Loop invocations stopped by a cancel token
    pub loops_cancelled: IntCounter,

    /// Chunks claimed from loop cursors
    pub chunks_claimed: IntCounter,

    /// Indices delivered to actions
    pub indices_visited: IntCounter,

    /// Action invocations that failed or panicked
    pub action_failures: IntCounter,
}

impl Default for StrideMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StrideMetrics {
    /// Create metrics with the default prefix "stride".
    pub fn new() -> Self {
        Self::with_prefix("stride")
    }

    /// Create metrics with a custom prefix.
    ///
    /// Metric names will be `{prefix}_loops_started`, `{prefix}_chunks_claimed`,
    /// etc. The prefix is sanitized to be a valid Prometheus metric name:
    /// hyphens and other invalid characters are replaced with underscores.
    pub fn with_prefix(prefix: &str) -> Self {
        // Valid chars: [a-zA-Z_:] for first char, [a-zA-Z0-9_:] for rest
        let prefix: String = prefix
            .chars()
            .enumerate()
            .map(|(i, c)| {
                let valid = c == '_'
                    || c == ':'
                    || if i == 0 {
                        c.is_ascii_alphabetic()
                    } else {
                        c.is_ascii_alphanumeric()
                    };
                if valid {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        let gauge = |name: &str, help: &str| {
            IntGauge::with_opts(Opts::new(format!("{prefix}_{name}"), help))
                .expect("metric creation should not fail")
        };
        let counter = |name: &str, help: &str| {
            IntCounter::with_opts(Opts::new(format!("{prefix}_{name}"), help))
                .expect("metric creation should not fail")
        };

        Self {
            loops_in_flight: gauge("loops_in_flight", "Loop invocations currently executing"),
            worker_threads: gauge("worker_threads", "Worker threads in the pool"),
            loops_started: counter("loops_started", "Loop invocations started"),
            loops_completed: counter("loops_completed", "Loop invocations that returned success"),
            loops_failed: counter("loops_failed", "Loop invocations that returned an error"),
            loops_cancelled: counter(
                "loops_cancelled",
                "Loop invocations stopped by a cancel token",
            ),
            chunks_claimed: counter("chunks_claimed", "Chunks claimed from loop cursors"),
            indices_visited: counter("indices_visited", "Indices delivered to actions"),
            action_failures: counter(
                "action_failures",
                "Action invocations that failed or panicked",
            ),
        }
    }

    /// Register all metrics with a Registry for exposition.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate names).
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.loops_in_flight.clone()))?;
        registry.register(Box::new(self.worker_threads.clone()))?;
        registry.register(Box::new(self.loops_started.clone()))?;
        registry.register(Box::new(self.loops_completed.clone()))?;
        registry.register(Box::new(self.loops_failed.clone()))?;
        registry.register(Box::new(self.loops_cancelled.clone()))?;
        registry.register(Box::new(self.chunks_claimed.clone()))?;
        registry.register(Box::new(self.indices_visited.clone()))?;
        registry.register(Box::new(self.action_failures.clone()))?;
        Ok(())
    }
}

impl std::fmt::Debug for StrideMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrideMetrics")
            .field("loops_in_flight", &self.loops_in_flight.get())
            .field("loops_started", &self.loops_started.get())
            .field("chunks_claimed", &self.chunks_claimed.get())
            .field("indices_visited", &self.indices_visited.get())
            .field("action_failures", &self.action_failures.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = StrideMetrics::new();
        assert_eq!(metrics.loops_in_flight.get(), 0);
        assert_eq!(metrics.loops_started.get(), 0);
        assert_eq!(metrics.indices_visited.get(), 0);
    }

    #[test]
    fn test_counter_increments() {
        let metrics = StrideMetrics::new();

        metrics.loops_started.inc();
        metrics.chunks_claimed.inc();
        metrics.indices_visited.inc_by(128);

        assert_eq!(metrics.loops_started.get(), 1);
        assert_eq!(metrics.chunks_claimed.get(), 1);
        assert_eq!(metrics.indices_visited.get(), 128);
    }

    #[test]
    fn test_registry_integration() {
        let metrics = StrideMetrics::new();
        let registry = Registry::new();

        metrics
            .register(&registry)
            .expect("registration should succeed");

        metrics.loops_started.inc();

        let families = registry.gather();
        let started = families
            .iter()
            .find(|f| f.get_name() == "stride_loops_started");
        assert!(started.is_some());
    }

    #[test]
    fn test_custom_prefix_sanitized() {
        let metrics = StrideMetrics::with_prefix("my-app");
        let registry = Registry::new();

        metrics
            .register(&registry)
            .expect("registration should succeed");

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "my_app_loops_started"));
    }

    #[test]
    fn test_metrics_clone_shares_counters() {
        let metrics = StrideMetrics::new();
        metrics.loops_started.inc();

        let cloned = metrics.clone();
        assert_eq!(cloned.loops_started.get(), 1);

        cloned.loops_started.inc();
        assert_eq!(metrics.loops_started.get(), 2);
    }
}
