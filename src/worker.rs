//! The per-worker claim/process loop.
//!
//! Each worker runs an explicit state machine over one loop invocation:
//!
//! ```text
//! Claiming ──claim ok──► Processing(chunk)
//!    │  ▲                     │
//!    │  └────chunk done───────┘
//!    └──exhausted / stop / cancel──► Done
//! ```
//!
//! `Claiming -> Done` fires when the cursor is exhausted, when a fail-fast
//! failure has set the invocation stop flag, or when the caller's
//! cancellation token fires. A worker never abandons a chunk it has started
//! except for its own fail-fast failure mid-chunk.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::config::ErrorPolicy;
use crate::cursor::{Chunk, ChunkCursor};
use crate::error::{ActionError, BoxError};
use crate::metrics::StrideMetrics;

/// Cooperative cancellation for an in-flight loop.
///
/// Clone the token, hand one clone to [`LoopOptions::cancel_token`] and keep
/// the other; calling [`cancel`] makes every worker stop claiming new chunks.
/// The chunk a worker is processing when it observes cancellation still
/// finishes, so indices are never half-processed.
///
/// [`LoopOptions::cancel_token`]: crate::LoopOptions::cancel_token
/// [`cancel`]: CancelToken::cancel
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// State shared by all workers of one loop invocation.
///
/// Owned by the scheduling call for exactly the duration of the loop;
/// nothing here outlives the invocation.
pub(crate) struct LoopShared<'a, F> {
    pub cursor: ChunkCursor,
    action: &'a F,
    policy: ErrorPolicy,
    cancel: Option<&'a CancelToken>,
    /// Set by the first fail-fast failure; stops new chunk claims.
    stop: AtomicBool,
    /// Touched only on failure, so the happy path never contends on it.
    failures: Mutex<Vec<ActionError>>,
}

impl<'a, F> LoopShared<'a, F> {
    pub fn new(
        cursor: ChunkCursor,
        action: &'a F,
        policy: ErrorPolicy,
        cancel: Option<&'a CancelToken>,
    ) -> Self {
        Self {
            cursor,
            action,
            policy,
            cancel,
            stop: AtomicBool::new(false),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Whether workers should stop claiming new chunks.
    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire) || self.cancel.is_some_and(|t| t.is_cancelled())
    }

    fn record_failure(&self, failure: ActionError) {
        self.failures.lock().push(failure);
        if self.policy == ErrorPolicy::FailFast {
            self.stop.store(true, Ordering::Release);
        }
    }

    /// Consume the invocation state and return the recorded failures.
    pub fn into_failures(self) -> Vec<ActionError> {
        self.failures.into_inner()
    }
}

/// Per-worker state for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerState {
    Claiming,
    Processing(Chunk),
    Done,
}

/// Run one worker to completion.
///
/// Sets `done` as its final act; the scheduling call checks every worker's
/// flag after the join to assert none terminated outside the state machine.
pub(crate) fn run_worker<F, E>(
    shared: &LoopShared<'_, F>,
    metrics: &StrideMetrics,
    done: &AtomicBool,
) where
    F: Fn(i64) -> Result<(), E> + Sync,
    E: Into<BoxError>,
{
    let mut state = WorkerState::Claiming;
    loop {
        state = match state {
            WorkerState::Claiming => {
                if shared.should_stop() {
                    WorkerState::Done
                } else {
                    match shared.cursor.claim() {
                        Some(chunk) => {
                            metrics.chunks_claimed.inc();
                            WorkerState::Processing(chunk)
                        }
                        None => WorkerState::Done,
                    }
                }
            }
            WorkerState::Processing(chunk) => process_chunk(shared, metrics, chunk),
            WorkerState::Done => break,
        };
    }
    done.store(true, Ordering::Release);
}

/// Process every in-range index of a claimed chunk.
///
/// Under fail-fast the worker's own failure ends the chunk early and
/// transitions straight to `Done`; a failure on another worker only takes
/// effect at the next claim.
fn process_chunk<F, E>(
    shared: &LoopShared<'_, F>,
    metrics: &StrideMetrics,
    chunk: Chunk,
) -> WorkerState
where
    F: Fn(i64) -> Result<(), E> + Sync,
    E: Into<BoxError>,
{
    let mut visited = 0u64;
    let mut failed_fast = false;

    for index in chunk.indices() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (shared.action)(index)));
        visited += 1;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                let cause = err.into();
                warn!(index, %cause, "action failed");
                Some(ActionError::new(index, cause))
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                warn!(index, %msg, "action panicked");
                Some(ActionError::new(
                    index,
                    format!("action panicked: {msg}").into(),
                ))
            }
        };

        if let Some(failure) = failure {
            metrics.action_failures.inc();
            shared.record_failure(failure);
            if shared.policy == ErrorPolicy::FailFast {
                failed_fast = true;
                break;
            }
        }
    }

    metrics.indices_visited.inc_by(visited);
    if failed_fast {
        WorkerState::Done
    } else {
        WorkerState::Claiming
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicI64;

    fn infallible(counter: &AtomicI64) -> impl Fn(i64) -> Result<(), Infallible> + Sync + '_ {
        move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let clone = token.clone();
        clone.cancel();
        // Clones share the flag.
        assert!(token.is_cancelled());

        // Idempotent.
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_worker_drains_range_alone() {
        let counter = AtomicI64::new(0);
        let action = infallible(&counter);
        let shared = LoopShared::new(
            ChunkCursor::new(0, 10, 4),
            &action,
            ErrorPolicy::FailFast,
            None,
        );
        let metrics = StrideMetrics::new();
        let done = AtomicBool::new(false);

        run_worker(&shared, &metrics, &done);

        assert!(done.load(Ordering::Acquire));
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        assert!(shared.cursor.is_exhausted());
        assert!(shared.into_failures().is_empty());
        assert_eq!(metrics.chunks_claimed.get(), 3);
        assert_eq!(metrics.indices_visited.get(), 10);
    }

    #[test]
    fn test_worker_stops_on_pre_cancelled_token() {
        let counter = AtomicI64::new(0);
        let action = infallible(&counter);
        let token = CancelToken::new();
        token.cancel();

        let shared = LoopShared::new(
            ChunkCursor::new(0, 100, 4),
            &action,
            ErrorPolicy::FailFast,
            Some(&token),
        );
        let metrics = StrideMetrics::new();
        let done = AtomicBool::new(false);

        run_worker(&shared, &metrics, &done);

        assert!(done.load(Ordering::Acquire));
        assert_eq!(counter.load(Ordering::Relaxed), 0);
        assert!(!shared.cursor.is_exhausted());
    }

    #[test]
    fn test_fail_fast_stops_mid_chunk_and_stops_claiming() {
        let counter = AtomicI64::new(0);
        let action = |i: i64| -> Result<(), BoxError> {
            counter.fetch_add(1, Ordering::Relaxed);
            if i == 2 {
                return Err("boom".into());
            }
            Ok(())
        };
        let shared = LoopShared::new(
            ChunkCursor::new(0, 100, 4),
            &action,
            ErrorPolicy::FailFast,
            None,
        );
        let metrics = StrideMetrics::new();
        let done = AtomicBool::new(false);

        run_worker(&shared, &metrics, &done);

        // Indices 0, 1, 2 attempted; index 3 of the first chunk skipped and
        // no further chunk claimed.
        assert_eq!(counter.load(Ordering::Relaxed), 3);
        assert!(!shared.cursor.is_exhausted());

        let failures = shared.into_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index(), 2);
    }

    #[test]
    fn test_collect_all_attempts_every_index() {
        let counter = AtomicI64::new(0);
        let action = |i: i64| -> Result<(), BoxError> {
            counter.fetch_add(1, Ordering::Relaxed);
            if i % 5 == 0 {
                return Err("multiple of five".into());
            }
            Ok(())
        };
        let shared = LoopShared::new(
            ChunkCursor::new(0, 20, 4),
            &action,
            ErrorPolicy::CollectAll,
            None,
        );
        let metrics = StrideMetrics::new();
        let done = AtomicBool::new(false);

        run_worker(&shared, &metrics, &done);

        assert_eq!(counter.load(Ordering::Relaxed), 20);
        assert!(shared.cursor.is_exhausted());

        let failures = shared.into_failures();
        let mut failed: Vec<i64> = failures.iter().map(|f| f.index()).collect();
        failed.sort_unstable();
        assert_eq!(failed, vec![0, 5, 10, 15]);
        assert_eq!(metrics.action_failures.get(), 4);
    }

    #[test]
    fn test_panicking_action_recorded_as_failure() {
        let action = |i: i64| -> Result<(), Infallible> {
            if i == 1 {
                panic!("index went sideways");
            }
            Ok(())
        };
        let shared = LoopShared::new(
            ChunkCursor::new(0, 4, 4),
            &action,
            ErrorPolicy::CollectAll,
            None,
        );
        let metrics = StrideMetrics::new();
        let done = AtomicBool::new(false);

        run_worker(&shared, &metrics, &done);

        assert!(done.load(Ordering::Acquire));
        let failures = shared.into_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index(), 1);
        assert!(failures[0].cause().to_string().contains("index went sideways"));
    }
}
