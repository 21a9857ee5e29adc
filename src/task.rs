use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::DropGuard;

use crate::error::PoolError;
use crate::scope::DeadlineScope;

/// Unique identifier assigned to each submission.
pub type TaskId = u64;

/// Outcome of a single task execution: `Ok(())` or a failure. Business
/// errors travel inside [`PoolError::Task`].
pub type TaskOutcome = Result<(), PoolError>;

/// The future a task resolves to.
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskOutcome> + Send + 'static>>;

/// A unit of work the pool can execute.
///
/// Implementors receive a [`DeadlineScope`] and should check it
/// cooperatively; the pool aborts the returned future once the scope is
/// cancelled or its deadline passes.
pub trait Task: Send + 'static {
  fn execute(self: Box<Self>, scope: DeadlineScope) -> TaskFuture;
}

/// Function adapter implementing [`Task`] for plain closures.
pub struct TaskFunc<F>(F);

impl<F> TaskFunc<F> {
  pub fn new(f: F) -> Self {
    Self(f)
  }
}

impl<F, Fut> Task for TaskFunc<F>
where
  F: FnOnce(DeadlineScope) -> Fut + Send + 'static,
  Fut: Future<Output = TaskOutcome> + Send + 'static,
{
  fn execute(self: Box<Self>, scope: DeadlineScope) -> TaskFuture {
    Box::pin((self.0)(scope))
  }
}

/// The result of one task execution, delivered through the envelope's
/// single-slot sink.
#[derive(Debug, Default)]
pub struct TaskResult {
  pub id: TaskId,
  /// `None` on success.
  pub error: Option<PoolError>,
  pub duration: Duration,
  pub started_at: Option<Instant>,
}

impl TaskResult {
  /// Whether the task finished without an error.
  pub fn is_success(&self) -> bool {
    self.error.is_none()
  }

  fn reset(&mut self) {
    self.id = 0;
    self.error = None;
    self.duration = Duration::ZERO;
    self.started_at = None;
  }
}

/// Internal wrapper binding a task to its identifier, deadline scope,
/// result sink and effective timeout. Exclusively owned by the worker that
/// dequeues it; nothing inside an envelope is shared across tasks.
pub(crate) struct TaskEnvelope {
  pub(crate) id: TaskId,
  pub(crate) task: Box<dyn Task>,
  pub(crate) scope: DeadlineScope,
  /// Releases the deadline scope on every exit path, including queue
  /// teardown before the envelope ever reaches a worker.
  pub(crate) scope_guard: DropGuard,
  pub(crate) result_tx: mpsc::Sender<TaskResult>,
  pub(crate) timeout: Duration,
}

const MAX_POOLED_RESULTS: usize = 64;

/// Recycles [`TaskResult`] instances between executions.
///
/// Ownership of a delivered result moves to the caller, so only results
/// whose delivery failed come back here. Every instance is reset before it
/// re-enters the pool; a stale field leaking into a later execution is a
/// correctness bug.
pub(crate) struct ResultPool {
  slots: Mutex<Vec<TaskResult>>,
}

impl ResultPool {
  pub(crate) fn new() -> Self {
    Self {
      slots: Mutex::new(Vec::new()),
    }
  }

  pub(crate) fn get(&self) -> TaskResult {
    self.slots.lock().pop().unwrap_or_default()
  }

  pub(crate) fn put(&self, mut result: TaskResult) {
    result.reset();
    let mut slots = self.slots.lock();
    if slots.len() < MAX_POOLED_RESULTS {
      slots.push(result);
    }
  }
}

/// Renders a panic payload for logs and [`PoolError::TaskPanicked`].
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&'static str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "opaque panic payload".to_string()
  }
}
