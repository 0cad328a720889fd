//! Metrics collection for stride-rs runtime observability.
//!
//! Prometheus-compatible metrics for monitoring loop scheduling. Metrics are
//! always collected (atomic operations only) and can optionally be exposed
//! via a Prometheus registry for scraping.
//!
//! # Available Metrics
//!
//! ## Gauges (current values)
//!
//! - `stride_loops_in_flight` - Loop invocations currently executing
//! - `stride_worker_threads` - Worker threads in the pool
//!
//! ## Counters (cumulative)
//!
//! - `stride_loops_started` - Loop invocations started
//! - `stride_loops_completed` - Loop invocations that returned success
//! - `stride_loops_failed` - Loop invocations that returned an error
//! - `stride_loops_cancelled` - Loop invocations stopped by a cancel token
//! - `stride_chunks_claimed` - Chunks claimed from loop cursors
//! - `stride_indices_visited` - Indices delivered to actions
//! - `stride_action_failures` - Action invocations that failed or panicked
//!
//! # Example
//!
//! ```ignore
//! use prometheus::Registry;
//! use stride_rs::StrideBuilder;
//!
//! let registry = Registry::new();
//! let runtime = StrideBuilder::new()
//!     .prometheus_registry(registry.clone())
//!     .build()?;
//!
//! // Later: expose metrics via HTTP
//! use prometheus::TextEncoder;
//! let encoder = TextEncoder::new();
//! let mut buffer = Vec::new();
//! encoder.encode(&registry.gather(), &mut buffer)?;
//! ```

mod prometheus;

pub use self::prometheus::StrideMetrics;
