//! A Tokio-based worker pool for bounded concurrent task execution with
//! per-task deadlines, panic isolation, execution metrics and controlled
//! shutdown.
//!
//! Work units implement [`Task`] (or wrap a closure via
//! [`Pool::submit_func`]); the pool runs them across a fixed set of workers
//! pulling from one shared bounded queue. Submissions never block: a
//! saturated queue rejects immediately with [`PoolError::PoolFull`]. Each
//! task executes under its own [`DeadlineScope`] and inside a
//! panic-isolation boundary, so a misbehaving task can fail only itself.

mod config;
mod error;
mod handle;
mod metrics;
mod pool;
mod scope;
mod task;
mod worker;

pub use config::{PanicHandler, PoolConfig};
pub use error::{BoxError, PoolError};
pub use handle::ResultHandle;
pub use metrics::PoolMetrics;
pub use pool::{BatchResult, Pool};
pub use scope::DeadlineScope;
pub use task::{Task, TaskFunc, TaskFuture, TaskId, TaskOutcome, TaskResult};
