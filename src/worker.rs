use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::PanicHandler;
use crate::error::PoolError;
use crate::metrics::MetricsRegistry;
use crate::task::{panic_message, ResultPool, TaskEnvelope, TaskId, TaskResult};

/// A single execution unit of the pool.
///
/// Each worker owns a clone of the shared queue receiver and alternates
/// between idle and executing until pool-wide cancellation, queue closure
/// or idle retirement ends it.
pub(crate) struct Worker {
  pub(crate) pool_name: Arc<String>,
  pub(crate) index: usize,
  pub(crate) queue: async_channel::Receiver<TaskEnvelope>,
  pub(crate) shutdown: CancellationToken,
  pub(crate) metrics: Arc<MetricsRegistry>,
  pub(crate) results: Arc<ResultPool>,
  pub(crate) panic_handler: Option<PanicHandler>,
  pub(crate) idle_timeout: Duration,
  pub(crate) result_grace: Duration,
}

impl Worker {
  pub(crate) async fn run(self) {
    self.metrics.worker_started();
    info!(pool = %self.pool_name, index = self.index, "worker started");

    loop {
      tokio::select! {
        biased;

        _ = self.shutdown.cancelled() => {
          info!(pool = %self.pool_name, index = self.index, "shutdown signal received, worker terminating");
          break;
        }

        received = self.queue.recv() => {
          match received {
            Ok(envelope) => self.execute(envelope).await,
            Err(_) => {
              info!(pool = %self.pool_name, index = self.index, "task queue closed, worker terminating");
              break;
            }
          }
        }

        _ = sleep(self.idle_timeout) => {
          if self.metrics.try_retire_worker() {
            info!(pool = %self.pool_name, index = self.index, "idle timeout reached, worker retiring");
            return;
          }
          // Last worker alive stays up so an open pool can always make progress.
          trace!(pool = %self.pool_name, index = self.index, "idle timeout reached, staying as last worker");
        }
      }
    }

    self.metrics.worker_stopped();
  }

  async fn execute(&self, envelope: TaskEnvelope) {
    let TaskEnvelope {
      id,
      task,
      scope,
      scope_guard: _scope_guard,
      result_tx,
      timeout: task_timeout,
    } = envelope;

    debug!(
      pool = %self.pool_name,
      task_id = id,
      timeout_ms = task_timeout.as_millis() as u64,
      "executing task"
    );

    let started_at = Instant::now();
    let mut result = self.results.get();
    result.id = id;
    result.started_at = Some(started_at);

    result.error = if scope.is_expired() {
      // The deadline passed while the envelope sat in the queue.
      Some(PoolError::TaskTimeout)
    } else if scope.is_cancelled() {
      Some(PoolError::Cancelled)
    } else {
      let fut = task.execute(scope.clone());
      tokio::select! {
        biased;

        _ = scope.cancelled() => {
          if scope.is_expired() {
            debug!(pool = %self.pool_name, task_id = id, "task deadline exceeded");
            Some(PoolError::TaskTimeout)
          } else {
            debug!(pool = %self.pool_name, task_id = id, "task aborted by pool cancellation");
            Some(PoolError::Cancelled)
          }
        }

        unwound = AssertUnwindSafe(fut).catch_unwind() => {
          match unwound {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(payload) => {
              let message = panic_message(payload.as_ref());
              error!(pool = %self.pool_name, task_id = id, panic = %message, "task panicked during execution");
              if let Some(handler) = &self.panic_handler {
                handler(payload.as_ref());
              }
              Some(PoolError::TaskPanicked(message))
            }
          }
        }
      }
    };

    result.duration = started_at.elapsed();
    self.metrics.task_finished(result.error.is_some(), result.duration);

    self.deliver(id, result, &result_tx).await;
    // _scope_guard drops here, releasing the deadline scope on every path.
  }

  /// Bounded best-effort delivery: the single result slot is reserved for
  /// at most `result_grace`; an unclaimed result is dropped rather than
  /// holding the worker hostage to an unreceptive caller.
  async fn deliver(&self, id: TaskId, result: TaskResult, result_tx: &mpsc::Sender<TaskResult>) {
    match timeout(self.result_grace, result_tx.reserve()).await {
      Ok(Ok(permit)) => permit.send(result),
      Ok(Err(_)) => {
        debug!(pool = %self.pool_name, task_id = id, "result receiver dropped, discarding result");
        self.results.put(result);
      }
      Err(_) => {
        warn!(
          pool = %self.pool_name,
          task_id = id,
          grace_ms = self.result_grace.as_millis() as u64,
          "result unclaimed within the delivery grace window, dropping it"
        );
        self.results.put(result);
      }
    }
  }
}
