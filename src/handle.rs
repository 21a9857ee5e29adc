use tokio::sync::mpsc;

use crate::error::PoolError;
use crate::task::{TaskId, TaskResult};

/// A handle to one submitted task.
///
/// The executing worker delivers exactly one [`TaskResult`] into the
/// underlying single-value slot. Delivery is best-effort within the pool's
/// configured grace window, so a handle that is neither awaited nor dropped
/// promptly may miss its result.
#[derive(Debug)]
pub struct ResultHandle {
  task_id: TaskId,
  receiver: mpsc::Receiver<TaskResult>,
}

impl ResultHandle {
  pub(crate) fn new(task_id: TaskId, receiver: mpsc::Receiver<TaskResult>) -> Self {
    Self { task_id, receiver }
  }

  /// The unique id of the submission this handle belongs to.
  pub fn id(&self) -> TaskId {
    self.task_id
  }

  /// Awaits the task's result.
  ///
  /// # Errors
  /// Returns [`PoolError::ResultChannelClosed`] if the pool tore the
  /// envelope down before a result was produced, or the delivery grace
  /// window elapsed with the result unclaimed.
  pub async fn recv(mut self) -> Result<TaskResult, PoolError> {
    match self.receiver.recv().await {
      Some(result) => Ok(result),
      None => Err(PoolError::ResultChannelClosed),
    }
  }
}
