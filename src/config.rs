//! Configuration types for the stride-rs runtime.

use prometheus::Registry;
use serde::{Deserialize, Serialize};

use crate::worker::CancelToken;

/// Default chunk size when none is configured.
///
/// Small enough that short loops still spread across workers, large enough to
/// amortize the cursor lock over a few indices.
pub const DEFAULT_CHUNK_SIZE: i64 = 4;

/// Configuration for the Stride runtime.
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment
/// variables using figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrideConfig {
    /// Thread name prefix (default: "stride")
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// CPU set string (e.g., "0-7,16-23") or None for all CPUs
    #[serde(default)]
    pub cpuset: Option<String>,

    /// Number of worker threads (default: all CPUs after cpuset constraints)
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Default chunk size for loops that don't override it (default: 4)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,

    /// Prometheus registry for metrics exposition.
    /// If provided, metrics will be registered for scraping.
    /// Not serializable - must be set programmatically.
    #[serde(skip)]
    pub prometheus_registry: Option<Registry>,
}

fn default_prefix() -> String {
    "stride".to_string()
}

fn default_chunk_size() -> i64 {
    DEFAULT_CHUNK_SIZE
}

impl Default for StrideConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            cpuset: None,
            worker_threads: None,
            chunk_size: default_chunk_size(),
            prometheus_registry: None,
        }
    }
}

impl StrideConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the effective number of worker threads.
    ///
    /// Returns the configured value or every available CPU. The
    /// all-logical-processors default can oversubscribe shared hosts, which
    /// is why it is overridable here, via the environment, and via CLI args.
    pub fn effective_worker_threads(&self, available_cpus: usize) -> usize {
        self.worker_threads.unwrap_or(available_cpus).max(1)
    }
}

/// How action failures are reported for a single loop invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// The first failure stops new chunk claims; in-flight chunks finish and
    /// that first failure is returned.
    #[default]
    FailFast,
    /// Every index is attempted; all failures are gathered, sorted by index,
    /// and returned together.
    CollectAll,
}

/// Per-invocation options for a parallel loop.
///
/// Everything here defaults from the runtime configuration, so most callers
/// never construct one. Override selectively:
///
/// ```ignore
/// use stride_rs::{ErrorPolicy, LoopOptions};
///
/// let opts = LoopOptions::new()
///     .chunk_size(64)
///     .worker_count(4)
///     .error_policy(ErrorPolicy::CollectAll);
/// runtime.for_each_with(0, 1_000_000, &opts, |i| process(i))?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct LoopOptions {
    /// Indices claimed per cursor lock. None means the runtime default.
    pub chunk_size: Option<i64>,

    /// Worker tasks spawned for this loop. None means one per pool thread.
    pub worker_count: Option<usize>,

    /// Failure reporting policy. Defaults to fail-fast.
    pub error_policy: ErrorPolicy,

    /// Optional cancellation token, checked before each chunk claim.
    pub cancel: Option<CancelToken>,
}

impl LoopOptions {
    /// Create options that defer everything to the runtime configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of indices claimed per cursor lock.
    ///
    /// Values below 1 are rejected when the loop starts, not here.
    pub fn chunk_size(mut self, n: i64) -> Self {
        self.chunk_size = Some(n);
        self
    }

    /// Set the number of worker tasks for this loop.
    ///
    /// More workers than pool threads is allowed; the extra workers simply
    /// share threads and the loop stays correct.
    pub fn worker_count(mut self, n: usize) -> Self {
        self.worker_count = Some(n);
        self
    }

    /// Set the failure reporting policy.
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Attach a cancellation token.
    ///
    /// A cancelled token makes workers stop claiming new chunks; the chunk a
    /// worker is processing when it observes cancellation still finishes.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}
