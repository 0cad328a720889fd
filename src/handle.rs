//! Join handles for spawned loops.
//!
//! [`StrideRuntime::spawn_for_each`] starts a loop without blocking the
//! caller and returns a [`LoopHandle`]; joining the handle blocks until the
//! loop's workers have all finished and yields the loop's result. Spawn and
//! join are paired, so there is no dangling dispatch to poll on.
//!
//! The handle is a one-shot slot guarded by a `parking_lot` mutex with a
//! condvar for the blocking side; the completion half lives on the worker
//! pool and fills the slot exactly once.
//!
//! [`StrideRuntime::spawn_for_each`]: crate::StrideRuntime::spawn_for_each

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::Result;

struct HandleState {
    result: Mutex<Option<Result<()>>>,
    done: Condvar,
}

/// Handle to a loop running on the worker pool.
///
/// Dropping the handle without joining detaches the loop; it still runs to
/// completion, its result is discarded.
pub struct LoopHandle {
    state: Arc<HandleState>,
}

impl LoopHandle {
    pub(crate) fn new() -> (Self, LoopCompletion) {
        let state = Arc::new(HandleState {
            result: Mutex::new(None),
            done: Condvar::new(),
        });
        (
            Self {
                state: state.clone(),
            },
            LoopCompletion { state },
        )
    }

    /// Block until the loop finishes and return its result.
    pub fn join(self) -> Result<()> {
        let mut slot = self.state.result.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.state.done.wait(&mut slot);
        }
    }

    /// Whether the loop has finished, without blocking.
    pub fn is_finished(&self) -> bool {
        self.state.result.lock().is_some()
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Completion half of a [`LoopHandle`], held by the spawned runner.
pub(crate) struct LoopCompletion {
    state: Arc<HandleState>,
}

impl LoopCompletion {
    /// Publish the loop result and wake any joiner.
    pub fn complete(self, result: Result<()>) {
        *self.state.result.lock() = Some(result);
        self.state.done.notify_all();
    }
}
