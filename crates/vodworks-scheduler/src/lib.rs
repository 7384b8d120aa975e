//! Vodworks Scheduler
//!
//! The scheduling core: in-memory task store, bounded submission queue,
//! dynamically sized worker pool, and the backlog-driven auto-scaler.

pub mod autoscaler;
pub mod pool;
pub mod queue;
pub mod store;
/// Scripted executor and capturing bus for tests. Compiled only for this
/// crate's own tests or for consumers opting in via the `test-util` feature.
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use autoscaler::{AutoScaler, ScaleDecision};
pub use pool::WorkerPool;
pub use queue::TaskQueue;
pub use store::TaskStore;
