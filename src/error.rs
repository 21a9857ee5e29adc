use thiserror::Error;

/// Opaque error type for business failures returned by tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the pool, surfaced either synchronously at submission
/// time or through a task's delivered [`TaskResult`](crate::TaskResult).
#[derive(Error, Debug)]
pub enum PoolError {
  /// Submission or wait attempted after shutdown began.
  #[error("pool is closed")]
  PoolClosed,

  /// The bounded queue is at capacity; the submission was rejected without
  /// waiting.
  #[error("pool queue is full")]
  PoolFull,

  /// A submission carried no executable work.
  ///
  /// The typed API cannot express an absent task, so the pool never
  /// produces this variant today; it is kept so callers matching on the
  /// full submission error surface stay stable.
  #[error("task cannot be empty")]
  InvalidTask,

  /// The task's deadline elapsed before it finished.
  #[error("task execution timeout")]
  TaskTimeout,

  /// The task was aborted by pool-wide cancellation.
  #[error("task was cancelled")]
  Cancelled,

  /// The task panicked; the recovered payload description is attached.
  #[error("task panicked: {0}")]
  TaskPanicked(String),

  /// A business error returned by the task, passed through unchanged.
  #[error(transparent)]
  Task(#[from] BoxError),

  /// The result slot closed before a value was delivered.
  #[error("result channel closed before a result was delivered")]
  ResultChannelClosed,

  /// `close_with_timeout` gave up waiting; shutdown continues in the
  /// background.
  #[error("pool close timeout exceeded")]
  CloseTimeout,
}

impl PoolError {
  /// Wraps an arbitrary business error for return from a task.
  pub fn task<E: Into<BoxError>>(err: E) -> Self {
    PoolError::Task(err.into())
  }
}
