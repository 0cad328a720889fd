//! Stride runtime implementation.
//!
//! The runtime owns a fixed rayon thread pool with named, CPU-pinned worker
//! threads. Loop invocations are ephemeral: each call creates its own chunk
//! cursor, failure slot and stop flag, runs its workers as scope tasks on the
//! pool, and destroys all of that state on return. Two concurrent loops on
//! the same runtime share threads but never a cursor, so unrelated calls do
//! not contend on each other's lock.
//!
//! # Thread Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  StrideRuntime                         │
//! │  pool: rayon::ThreadPool ({prefix}-worker-NNNN)        │
//! │  metrics: StrideMetrics (always-on counters)           │
//! └────────────────────────────────────────────────────────┘
//!        │ per for_each call (ephemeral)
//!        ▼
//! ┌────────────────────┐   claim   ┌──────────────────────┐
//! │  ChunkCursor       │ ◄──────── │  worker tasks (N)    │
//! │  (one mutex)       │           │  Claiming/Processing │
//! └────────────────────┘           └──────────────────────┘
//! ```

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{ErrorPolicy, LoopOptions, StrideConfig};
use crate::cpu::{
    available_cpus, format_cpuset, parse_and_validate_cpuset, pin_to_cpu, CpuAllocator,
};
use crate::cursor::ChunkCursor;
use crate::error::{BoxError, Result, StrideError};
use crate::handle::LoopHandle;
use crate::metrics::StrideMetrics;
use crate::worker::{run_worker, LoopShared};

/// Keeps the loops-in-flight gauge honest even if a worker action panics
/// through the invocation.
struct ActiveLoopGuard<'a> {
    metrics: &'a StrideMetrics,
}

impl<'a> ActiveLoopGuard<'a> {
    fn new(metrics: &'a StrideMetrics) -> Self {
        metrics.loops_in_flight.inc();
        Self { metrics }
    }
}

impl Drop for ActiveLoopGuard<'_> {
    fn drop(&mut self) {
        self.metrics.loops_in_flight.dec();
    }
}

/// A chunked parallel-for runtime on a fixed, CPU-pinned worker pool.
///
/// Build one via [`StrideBuilder`], then run loops against it:
///
/// ```ignore
/// use stride_rs::StrideBuilder;
///
/// let runtime = StrideBuilder::new()
///     .prefix("myapp")
///     .worker_threads(6)
///     .build()?;
///
/// // Block until every index in [0, 1_000_000) has been processed.
/// runtime.for_each(0, 1_000_000, |i| process(i))?;
///
/// // Fallible actions propagate structured failures.
/// runtime.try_for_each(0, rows.len() as i64, |i| validate(&rows[i as usize]))?;
/// ```
///
/// Cloning is cheap and shares the pool.
///
/// [`StrideBuilder`]: crate::StrideBuilder
#[derive(Clone)]
pub struct StrideRuntime {
    inner: Arc<StrideRuntimeInner>,
}

struct StrideRuntimeInner {
    config: StrideConfig,
    pool: rayon::ThreadPool,
    worker_threads: usize,
    worker_cpus: Vec<usize>,
    metrics: StrideMetrics,
}

impl StrideRuntime {
    /// Create a runtime from a configuration.
    ///
    /// This is typically called via `StrideBuilder::build()`.
    pub(crate) fn from_config(config: StrideConfig) -> Result<Self> {
        let cpus = match config.cpuset {
            Some(ref cpuset_str) => parse_and_validate_cpuset(cpuset_str)?,
            None => available_cpus(),
        };
        if cpus.is_empty() {
            return Err(StrideError::NoCpusAvailable);
        }

        if config.chunk_size < 1 {
            return Err(StrideError::InvalidChunkSize(config.chunk_size));
        }
        if config.worker_threads == Some(0) {
            return Err(StrideError::InvalidWorkerCount(0));
        }

        let worker_threads = config.effective_worker_threads(cpus.len());
        if worker_threads > cpus.len() {
            return Err(StrideError::InsufficientCpus {
                requested: worker_threads,
                available: cpus.len(),
            });
        }

        info!(
            prefix = %config.prefix,
            worker_threads,
            total_cpus = cpus.len(),
            chunk_size = config.chunk_size,
            "building stride runtime"
        );

        let pool = Self::build_worker_pool(&config.prefix, worker_threads, cpus.clone())?;

        let metrics = StrideMetrics::new();
        metrics.worker_threads.set(worker_threads as i64);
        if let Some(ref registry) = config.prometheus_registry {
            if let Err(e) = metrics.register(registry) {
                warn!(%e, "failed to register prometheus metrics");
            }
        }

        Ok(Self {
            inner: Arc::new(StrideRuntimeInner {
                config,
                pool,
                worker_threads,
                worker_cpus: cpus,
                metrics,
            }),
        })
    }

    fn build_worker_pool(
        prefix: &str,
        num_threads: usize,
        cpus: Vec<usize>,
    ) -> Result<rayon::ThreadPool> {
        let allocator = Arc::new(CpuAllocator::new(cpus));
        let name_prefix: Arc<str> = prefix.into();
        let start_prefix = Arc::clone(&name_prefix);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |i| format!("{}-worker-{:04}", name_prefix, i))
            .start_handler(move |thread_index| {
                let cpu_id = allocator.allocate();
                debug!(thread_index, cpu_id, prefix = %start_prefix, "worker thread starting");
                if let Err(e) = pin_to_cpu(cpu_id) {
                    warn!(%e, prefix = %start_prefix, cpu_id, thread_index, "failed to pin worker");
                }
            })
            .build()?;

        Ok(pool)
    }

    /// Get the resolved configuration.
    pub fn config(&self) -> &StrideConfig {
        &self.inner.config
    }

    /// Number of worker threads in the pool.
    pub fn worker_threads(&self) -> usize {
        self.inner.worker_threads
    }

    /// CPUs the worker threads are pinned to.
    pub fn worker_cpus(&self) -> &[usize] {
        &self.inner.worker_cpus
    }

    /// Get the runtime metrics.
    ///
    /// Always collected; registering a Prometheus registry via the builder is
    /// only needed for exposition.
    pub fn metrics(&self) -> &StrideMetrics {
        &self.inner.metrics
    }

    /// Get the underlying rayon pool.
    ///
    /// Escape hatch for running other work on the same pinned threads.
    pub fn worker_pool(&self) -> &rayon::ThreadPool {
        &self.inner.pool
    }

    /// Apply `action` to every index in `[from_inclusive, to_exclusive)`,
    /// in parallel, blocking until all of them have been processed.
    ///
    /// Each index is delivered to exactly one invocation of `action`.
    /// `action` runs concurrently on multiple workers and must be safe for
    /// that; the runtime adds no synchronization around it. There is no
    /// ordering guarantee between indices in different chunks - the only
    /// guarantee is that every invocation completes before this returns.
    ///
    /// # Errors
    ///
    /// `InvalidRange` if `from_inclusive > to_exclusive` - rejected before
    /// any worker runs rather than treated as empty, since an inverted range
    /// is almost always a caller bug.
    pub fn for_each<F>(&self, from_inclusive: i64, to_exclusive: i64, action: F) -> Result<()>
    where
        F: Fn(i64) + Sync,
    {
        self.for_each_with(from_inclusive, to_exclusive, &LoopOptions::default(), action)
    }

    /// [`for_each`](Self::for_each) with per-call options.
    pub fn for_each_with<F>(
        &self,
        from_inclusive: i64,
        to_exclusive: i64,
        opts: &LoopOptions,
        action: F,
    ) -> Result<()>
    where
        F: Fn(i64) + Sync,
    {
        self.try_for_each_with(from_inclusive, to_exclusive, opts, move |index| {
            action(index);
            Ok::<(), Infallible>(())
        })
    }

    /// Fallible form of [`for_each`](Self::for_each).
    ///
    /// With the default fail-fast policy the first `Err` stops new chunk
    /// claims; in-flight chunks finish and the failure is returned as
    /// [`StrideError::ActionFailed`]. Under
    /// [`ErrorPolicy::CollectAll`](crate::ErrorPolicy::CollectAll) every
    /// index is still attempted and all failures come back together.
    pub fn try_for_each<F, E>(
        &self,
        from_inclusive: i64,
        to_exclusive: i64,
        action: F,
    ) -> Result<()>
    where
        F: Fn(i64) -> std::result::Result<(), E> + Sync,
        E: Into<BoxError>,
    {
        self.try_for_each_with(from_inclusive, to_exclusive, &LoopOptions::default(), action)
    }

    /// [`try_for_each`](Self::try_for_each) with per-call options.
    pub fn try_for_each_with<F, E>(
        &self,
        from_inclusive: i64,
        to_exclusive: i64,
        opts: &LoopOptions,
        action: F,
    ) -> Result<()>
    where
        F: Fn(i64) -> std::result::Result<(), E> + Sync,
        E: Into<BoxError>,
    {
        self.inner
            .run_loop(from_inclusive, to_exclusive, opts, &action)
    }

    /// Start a loop without blocking and return a handle to join later.
    ///
    /// The loop runs on the worker pool; [`LoopHandle::join`] blocks for the
    /// same result the blocking form would have returned. Dropping the handle
    /// detaches the loop.
    pub fn spawn_for_each<F>(
        &self,
        from_inclusive: i64,
        to_exclusive: i64,
        opts: LoopOptions,
        action: F,
    ) -> LoopHandle
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        self.spawn_try_for_each(from_inclusive, to_exclusive, opts, move |index| {
            action(index);
            Ok::<(), Infallible>(())
        })
    }

    /// Fallible form of [`spawn_for_each`](Self::spawn_for_each).
    pub fn spawn_try_for_each<F, E>(
        &self,
        from_inclusive: i64,
        to_exclusive: i64,
        opts: LoopOptions,
        action: F,
    ) -> LoopHandle
    where
        F: Fn(i64) -> std::result::Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let (handle, completion) = LoopHandle::new();
        let inner = Arc::clone(&self.inner);
        self.inner.pool.spawn(move || {
            completion.complete(inner.run_loop(from_inclusive, to_exclusive, &opts, &action));
        });
        handle
    }
}

impl StrideRuntimeInner {
    /// Run one loop invocation to completion.
    ///
    /// Validation happens before any worker runs; the scope exit is the join
    /// barrier that makes "all indices processed" hold before return.
    fn run_loop<F, E>(
        &self,
        from_inclusive: i64,
        to_exclusive: i64,
        opts: &LoopOptions,
        action: &F,
    ) -> Result<()>
    where
        F: Fn(i64) -> std::result::Result<(), E> + Sync,
        E: Into<BoxError>,
    {
        if from_inclusive > to_exclusive {
            return Err(StrideError::InvalidRange {
                from: from_inclusive,
                to: to_exclusive,
            });
        }

        let chunk_size = opts.chunk_size.unwrap_or(self.config.chunk_size);
        if chunk_size < 1 {
            return Err(StrideError::InvalidChunkSize(chunk_size));
        }

        let worker_count = opts.worker_count.unwrap_or(self.worker_threads);
        if worker_count == 0 {
            return Err(StrideError::InvalidWorkerCount(0));
        }

        self.metrics.loops_started.inc();
        if from_inclusive == to_exclusive {
            self.metrics.loops_completed.inc();
            return Ok(());
        }

        debug!(
            from_inclusive,
            to_exclusive, chunk_size, worker_count, "starting parallel loop"
        );
        let _active = ActiveLoopGuard::new(&self.metrics);

        let shared = LoopShared::new(
            ChunkCursor::new(from_inclusive, to_exclusive, chunk_size),
            action,
            opts.error_policy,
            opts.cancel.as_ref(),
        );
        let done_flags: Vec<AtomicBool> =
            (0..worker_count).map(|_| AtomicBool::new(false)).collect();

        self.pool.in_place_scope(|scope| {
            for done in &done_flags {
                let shared = &shared;
                let metrics = &self.metrics;
                scope.spawn(move |_| run_worker(shared, metrics, done));
            }
        });

        let cancelled = opts.cancel.as_ref().is_some_and(|t| t.is_cancelled());
        let exhausted = shared.cursor.is_exhausted();
        let mut failures = shared.into_failures();

        let result = if !failures.is_empty() {
            match opts.error_policy {
                ErrorPolicy::FailFast => {
                    // First failure observed; any later ones raced in before
                    // their workers saw the stop flag.
                    let first = failures.swap_remove(0);
                    let index = first.index();
                    Err(StrideError::ActionFailed {
                        index,
                        source: first.into_cause(),
                    })
                }
                ErrorPolicy::CollectAll => {
                    failures.sort_by_key(|f| f.index());
                    Err(StrideError::ActionsFailed(failures))
                }
            }
        } else if cancelled && !exhausted {
            Err(StrideError::Cancelled)
        } else if let Some(worker) = done_flags
            .iter()
            .position(|done| !done.load(Ordering::Acquire))
        {
            Err(StrideError::UnexpectedWorkerTermination(worker))
        } else {
            Ok(())
        };

        match &result {
            Ok(()) => self.metrics.loops_completed.inc(),
            Err(StrideError::Cancelled) => self.metrics.loops_cancelled.inc(),
            Err(_) => self.metrics.loops_failed.inc(),
        }
        debug!(
            from_inclusive,
            to_exclusive,
            ok = result.is_ok(),
            "parallel loop finished"
        );
        result
    }
}

impl std::fmt::Display for StrideRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "StrideRuntime[{}]: workers({}, cpus={}) chunk_size={}",
            self.inner.config.prefix,
            self.inner.worker_threads,
            format_cpuset(&self.inner.worker_cpus),
            self.inner.config.chunk_size
        )
    }
}

impl std::fmt::Debug for StrideRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrideRuntime")
            .field("prefix", &self.inner.config.prefix)
            .field("worker_threads", &self.inner.worker_threads)
            .field("worker_cpus", &self.inner.worker_cpus)
            .field("chunk_size", &self.inner.config.chunk_size)
            .finish()
    }
}
