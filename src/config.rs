use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::task::panic_message;

/// Callback invoked with the payload recovered from a panicking task.
pub type PanicHandler = Arc<dyn Fn(&(dyn Any + Send)) + Send + Sync>;

/// Immutable pool configuration, snapshotted at construction.
#[derive(Clone)]
pub struct PoolConfig {
  /// Ceiling on simultaneously executing tasks. Clamped to at least 1 at
  /// pool construction.
  pub max_workers: usize,
  /// Backlog capacity before submissions are rejected with
  /// [`PoolError::PoolFull`](crate::PoolError::PoolFull).
  pub queue_size: usize,
  /// Inactivity window after which a worker may retire, subject to the
  /// min-one-worker rule. Retired workers are not respawned.
  pub worker_idle_timeout: Duration,
  /// Default per-task deadline when none is supplied explicitly.
  pub task_timeout: Duration,
  /// Toggles collection of task counters and execution timings.
  pub enable_metrics: bool,
  /// Invoked with the recovered payload when a task panics.
  pub panic_handler: Option<PanicHandler>,
  /// How long a worker holds a finished result for the caller to claim it
  /// before dropping it. The result sink holds exactly one value; an
  /// unclaimed result is lost, never re-delivered.
  pub result_grace: Duration,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      max_workers: num_cpus::get(),
      queue_size: 100,
      worker_idle_timeout: Duration::from_secs(30),
      task_timeout: Duration::from_secs(5 * 60),
      enable_metrics: true,
      panic_handler: Some(Arc::new(|payload| {
        error!(panic = %panic_message(payload), "worker recovered a task panic");
      })),
      result_grace: Duration::from_millis(100),
    }
  }
}

impl fmt::Debug for PoolConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PoolConfig")
      .field("max_workers", &self.max_workers)
      .field("queue_size", &self.queue_size)
      .field("worker_idle_timeout", &self.worker_idle_timeout)
      .field("task_timeout", &self.task_timeout)
      .field("enable_metrics", &self.enable_metrics)
      .field("panic_handler", &self.panic_handler.is_some())
      .field("result_grace", &self.result_grace)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_sensible() {
    let config = PoolConfig::default();
    assert!(config.max_workers >= 1);
    assert_eq!(config.queue_size, 100);
    assert_eq!(config.worker_idle_timeout, Duration::from_secs(30));
    assert_eq!(config.task_timeout, Duration::from_secs(300));
    assert!(config.enable_metrics);
    assert!(config.panic_handler.is_some());
    assert_eq!(config.result_grace, Duration::from_millis(100));
  }
}
