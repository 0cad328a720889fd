//! Error types for stride-rs.

use std::fmt;

use thiserror::Error;

/// Boxed error type used for action failure causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A single action failure, carrying the index it occurred at and its cause.
///
/// Produced when a fallible action returns `Err` or when an action panics.
/// Surfaced to the caller inside [`StrideError::ActionFailed`] (fail-fast) or
/// [`StrideError::ActionsFailed`] (collect-all).
#[derive(Debug)]
pub struct ActionError {
    index: i64,
    cause: BoxError,
}

impl ActionError {
    pub(crate) fn new(index: i64, cause: BoxError) -> Self {
        Self { index, cause }
    }

    /// The index the action was processing when it failed.
    pub fn index(&self) -> i64 {
        self.index
    }

    /// The underlying cause.
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    /// Consume the failure and take its cause.
    pub fn into_cause(self) -> BoxError {
        self.cause
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index {}: {}", self.index, self.cause)
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Errors that can occur when building or using a Stride runtime.
#[derive(Debug, Error)]
pub enum StrideError {
    /// The loop range is inverted. Rejected before any worker runs.
    #[error("invalid range: from_inclusive {from} > to_exclusive {to}")]
    InvalidRange { from: i64, to: i64 },

    /// Chunk size must be at least 1. Rejected before any worker runs.
    #[error("chunk_size must be >= 1, got {0}")]
    InvalidChunkSize(i64),

    /// Worker count must be at least 1. Rejected before any worker runs.
    #[error("worker_count must be >= 1, got {0}")]
    InvalidWorkerCount(usize),

    /// The action failed at one index; remaining chunk claims were cancelled.
    #[error("action failed at index {index}")]
    ActionFailed {
        index: i64,
        #[source]
        source: BoxError,
    },

    /// The action failed at one or more indices; every index was attempted.
    #[error("{} action(s) failed, first at index {}", .0.len(), .0[0].index())]
    ActionsFailed(Vec<ActionError>),

    /// The loop was cancelled before the range was exhausted.
    #[error("loop cancelled before the range was exhausted")]
    Cancelled,

    /// A worker stopped without reaching the exhaustion condition.
    ///
    /// Unreachable given the claim-loop invariants; kept as a check so a
    /// broken invariant surfaces as an error instead of a silently
    /// incomplete loop.
    #[error("worker {0} terminated before observing range exhaustion")]
    UnexpectedWorkerTermination(usize),

    /// Error parsing CPU set string.
    #[error("invalid cpuset format: {0}")]
    InvalidCpuSet(String),

    /// CPU ID is not available on this system.
    #[error("CPU {0} is not available on this system")]
    CpuNotAvailable(usize),

    /// No CPUs available after applying constraints.
    #[error("no CPUs available after applying constraints")]
    NoCpusAvailable,

    /// Not enough CPUs for the requested worker threads.
    #[error("requested {requested} worker threads but only {available} CPUs available")]
    InsufficientCpus { requested: usize, available: usize },

    /// Error setting thread affinity.
    #[error("failed to pin worker to CPU {0}")]
    AffinityFailed(usize),

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Error building the rayon worker pool.
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type alias for Stride operations.
pub type Result<T> = std::result::Result<T, StrideError>;
