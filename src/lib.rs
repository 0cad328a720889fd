//! # stride-rs
//!
//! **Chunked parallel for-loops over a pinned worker pool**
//!
//! A parallel for-loop runtime: apply an action to every index of an integer
//! range `[from_inclusive, to_exclusive)`, spread across a fixed pool of
//! CPU-pinned worker threads, blocking until every index has been processed.
//!
//! Workers claim contiguous chunks of indices from a shared cursor; the
//! read-and-advance happens under one mutex, so no index is ever processed
//! twice or skipped, whatever the interleaving. Larger chunks amortize the
//! cursor lock over more indices at the cost of any ordering between chunks.
//!
//! ## Features
//!
//! - **Exactly-once delivery**: each index reaches the action exactly once,
//!   for any chunk size and worker count
//! - **CPU Pinning**: worker threads are pinned to specific CPUs for
//!   consistent performance
//! - **Structured failures**: fail-fast (default) or collect-all error
//!   policies; panicking actions surface as failures, never dead workers
//! - **Cancellation**: cooperative cancel tokens checked at chunk claims
//! - **Flexible Configuration**: configure via files (TOML/YAML/JSON),
//!   environment variables, or code
//! - **CLI Integration**: built-in clap support for command-line overrides
//! - **Metrics**: always-on Prometheus counters, registry optional
//!
//! ## Quick Start
//!
//! ```ignore
//! use stride_rs::StrideBuilder;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = StrideBuilder::new()
//!         .prefix("myapp")
//!         .worker_threads(6)
//!         .chunk_size(16)
//!         .build()?;
//!
//!     // Blocks until every index in [0, data.len()) has been processed.
//!     runtime.for_each(0, data.len() as i64, |i| {
//!         process(&data[i as usize]);
//!     })?;
//!
//!     // Fallible actions propagate structured failures.
//!     runtime.try_for_each(0, rows.len() as i64, |i| validate(&rows[i as usize]))?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Ergonomic Access
//!
//! One-shot callers can skip the builder and use the crate-level functions,
//! which share a lazily-built default runtime configured from `STRIDE_*`
//! environment variables:
//!
//! ```ignore
//! stride_rs::for_each(0, 1_000_000, |i| process(i))?;
//! ```
//!
//! ## Configuration
//!
//! Configuration sources are merged in order (later sources override earlier):
//!
//! 1. Default values
//! 2. Config files (via `.file()`)
//! 3. Environment variables (via `.env_prefix()`)
//! 4. Programmatic overrides
//! 5. CLI arguments (via `.with_cli_args()`)
//!
//! ### Config File Example (TOML)
//!
//! ```toml
//! prefix = "myapp"
//! cpuset = "0-7,16-23"
//! worker_threads = 14
//! chunk_size = 16
//! ```
//!
//! ### Environment Variables
//!
//! With `.env_prefix("STRIDE")`:
//! - `STRIDE_PREFIX=myapp`
//! - `STRIDE_CPUSET=0-7`
//! - `STRIDE_WORKER_THREADS=6`
//! - `STRIDE_CHUNK_SIZE=16`
//!
//! ## CPU Set Format
//!
//! The `cpuset` option accepts a string in Linux taskset/numactl format:
//! - Single CPUs: `"0"`, `"5"`
//! - Ranges: `"0-7"`, `"16-23"`
//! - Mixed: `"0-3,8-11"`, `"0,2,4,6-8"`
//!
//! ## Thread Naming
//!
//! Worker threads are named with the configured prefix:
//! `{prefix}-worker-0000`, `{prefix}-worker-0001`, ...

use std::sync::OnceLock;

pub mod builder;
pub mod config;
pub mod cpu;
pub(crate) mod cursor;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod runtime;
pub(crate) mod worker;

pub use builder::{StrideArgs, StrideBuilder};
pub use config::{ErrorPolicy, LoopOptions, StrideConfig, DEFAULT_CHUNK_SIZE};
pub use error::{ActionError, BoxError, Result, StrideError};
pub use handle::LoopHandle;
pub use metrics::StrideMetrics;
pub use runtime::StrideRuntime;
pub use worker::CancelToken;

static DEFAULT_RUNTIME: OnceLock<StrideRuntime> = OnceLock::new();

/// Get the process-wide default runtime, building it on first use.
///
/// The default runtime reads `STRIDE_*` environment variables and otherwise
/// uses default configuration (all CPUs, chunk size 4). Applications that
/// want files, CLI args, or several pools should build their own runtime
/// with [`StrideBuilder`] instead.
///
/// # Errors
///
/// Propagates any build failure (bad `STRIDE_*` values, unavailable cpuset).
pub fn default_runtime() -> Result<&'static StrideRuntime> {
    if let Some(runtime) = DEFAULT_RUNTIME.get() {
        return Ok(runtime);
    }
    // Two threads may race the build; the loser's pool is dropped.
    let runtime = StrideBuilder::new().env_prefix("STRIDE").build()?;
    Ok(DEFAULT_RUNTIME.get_or_init(|| runtime))
}

/// Apply `action` to every index in `[from_inclusive, to_exclusive)` on the
/// default runtime, blocking until all of them have been processed.
///
/// This is a convenience for `default_runtime()?.for_each(..)`. See
/// [`StrideRuntime::for_each`] for the full contract.
///
/// # Example
///
/// ```ignore
/// stride_rs::for_each(0, items.len() as i64, |i| {
///     process(&items[i as usize]);
/// })?;
/// ```
pub fn for_each<F>(from_inclusive: i64, to_exclusive: i64, action: F) -> Result<()>
where
    F: Fn(i64) + Sync,
{
    default_runtime()?.for_each(from_inclusive, to_exclusive, action)
}

/// [`for_each`] with per-call options, on the default runtime.
pub fn for_each_with<F>(
    from_inclusive: i64,
    to_exclusive: i64,
    opts: &LoopOptions,
    action: F,
) -> Result<()>
where
    F: Fn(i64) + Sync,
{
    default_runtime()?.for_each_with(from_inclusive, to_exclusive, opts, action)
}

/// Fallible form of [`for_each`], on the default runtime.
///
/// See [`StrideRuntime::try_for_each`] for the failure policies.
pub fn try_for_each<F, E>(from_inclusive: i64, to_exclusive: i64, action: F) -> Result<()>
where
    F: Fn(i64) -> std::result::Result<(), E> + Sync,
    E: Into<BoxError>,
{
    default_runtime()?.try_for_each(from_inclusive, to_exclusive, action)
}

/// [`try_for_each`] with per-call options, on the default runtime.
pub fn try_for_each_with<F, E>(
    from_inclusive: i64,
    to_exclusive: i64,
    opts: &LoopOptions,
    action: F,
) -> Result<()>
where
    F: Fn(i64) -> std::result::Result<(), E> + Sync,
    E: Into<BoxError>,
{
    default_runtime()?.try_for_each_with(from_inclusive, to_exclusive, opts, action)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn test_default_runtime_free_functions() {
        let counter = AtomicI64::new(0);
        super::for_each(0, 100, |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 100);

        // The default runtime is shared across calls.
        let first = super::default_runtime().unwrap() as *const _;
        let second = super::default_runtime().unwrap() as *const _;
        assert_eq!(first, second);
    }
}
