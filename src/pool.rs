use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::TrySendError;
use futures::future;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::handle::ResultHandle;
use crate::metrics::{MetricsRegistry, PoolMetrics};
use crate::scope::DeadlineScope;
use crate::task::{ResultPool, Task, TaskEnvelope, TaskFunc, TaskId, TaskOutcome, TaskResult};
use crate::worker::Worker;

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);
}

fn next_task_id() -> TaskId {
  NEXT_TASK_ID.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Capacity of every envelope's result sink: exactly one value.
const RESULT_SINK_CAPACITY: usize = 1;

// Tri-state lifecycle flag. The open -> closing edge is taken exactly once.
const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Index-aligned outcome of [`Pool::submit_batch`].
///
/// Both sequences have one slot per submitted task, in submission order,
/// regardless of completion order. A task's business failure lives in
/// `results[i]`; `errors[i]` is reserved for submission and wait failures.
#[derive(Debug, Default)]
pub struct BatchResult {
  pub results: Vec<Option<TaskResult>>,
  pub errors: Vec<Option<PoolError>>,
}

/// A bounded-concurrency task execution pool.
///
/// Tasks are fanned out across a fixed set of workers pulling from one
/// shared bounded queue. Submissions never block: a saturated queue rejects
/// immediately with [`PoolError::PoolFull`]. Each task runs under its own
/// [`DeadlineScope`] and inside a panic-isolation boundary, so no task
/// failure can take the pool down.
pub struct Pool {
  name: Arc<String>,
  config: PoolConfig,
  queue_tx: async_channel::Sender<TaskEnvelope>,
  queue_rx: async_channel::Receiver<TaskEnvelope>,
  shutdown_token: CancellationToken,
  close_done: CancellationToken,
  state: AtomicU8,
  started: AtomicBool,
  worker_handles: Mutex<Vec<JoinHandle<()>>>,
  metrics: Arc<MetricsRegistry>,
  results: Arc<ResultPool>,
  tokio_handle: TokioHandle,
}

impl Pool {
  /// Creates a pool from `config`. Workers are not spawned until
  /// [`start`](Self::start). `max_workers` is clamped to at least 1, the
  /// queue capacity to at least 1 slot.
  pub fn new(mut config: PoolConfig, tokio_handle: TokioHandle, name: &str) -> Arc<Self> {
    config.max_workers = config.max_workers.max(1);
    let (queue_tx, queue_rx) = async_channel::bounded(config.queue_size.max(1));

    Arc::new(Self {
      name: Arc::new(name.to_string()),
      metrics: Arc::new(MetricsRegistry::new(config.enable_metrics)),
      config,
      queue_tx,
      queue_rx,
      shutdown_token: CancellationToken::new(),
      close_done: CancellationToken::new(),
      state: AtomicU8::new(STATE_OPEN),
      started: AtomicBool::new(false),
      worker_handles: Mutex::new(Vec::new()),
      results: Arc::new(ResultPool::new()),
      tokio_handle,
    })
  }

  /// Spawns the configured number of workers. Idempotent; a second call is
  /// a no-op.
  pub fn start(&self) {
    if self.started.swap(true, AtomicOrdering::SeqCst) {
      warn!(pool = %self.name, "start called on an already started pool");
      return;
    }

    let mut handles = self.worker_handles.lock();
    for index in 0..self.config.max_workers {
      let worker = Worker {
        pool_name: self.name.clone(),
        index,
        queue: self.queue_rx.clone(),
        shutdown: self.shutdown_token.clone(),
        metrics: self.metrics.clone(),
        results: self.results.clone(),
        panic_handler: self.config.panic_handler.clone(),
        idle_timeout: self.config.worker_idle_timeout,
        result_grace: self.config.result_grace,
      };
      handles.push(
        self
          .tokio_handle
          .spawn(worker.run().instrument(info_span!("pool_worker", pool = %self.name, index))),
      );
    }
    info!(pool = %self.name, workers = self.config.max_workers, "pool started");
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// The immutable configuration this pool was built with.
  pub fn config(&self) -> &PoolConfig {
    &self.config
  }

  /// Number of envelopes waiting in the queue right now.
  pub fn queued_task_count(&self) -> usize {
    self.queue_tx.len()
  }

  /// Number of live workers.
  pub fn worker_count(&self) -> i64 {
    self.metrics.active_workers()
  }

  /// Snapshot of the pool's execution metrics. Never mutates shared state.
  pub fn metrics(&self) -> PoolMetrics {
    self.metrics.snapshot()
  }

  /// Submits a task under the default task timeout. Never blocks.
  pub fn submit<T: Task>(&self, task: T) -> Result<ResultHandle, PoolError> {
    self.submit_with_timeout(task, self.config.task_timeout)
  }

  /// Submits a task with an explicit deadline.
  ///
  /// Never blocks: the envelope is enqueued if the queue has room,
  /// otherwise the call fails immediately with [`PoolError::PoolFull`].
  pub fn submit_with_timeout<T: Task>(
    &self,
    task: T,
    timeout: Duration,
  ) -> Result<ResultHandle, PoolError> {
    self.submit_boxed(Box::new(task), timeout)
  }

  /// Wraps a closure as a task and submits it under the default timeout.
  pub fn submit_func<F, Fut>(&self, f: F) -> Result<ResultHandle, PoolError>
  where
    F: FnOnce(DeadlineScope) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = TaskOutcome> + Send + 'static,
  {
    self.submit(TaskFunc::new(f))
  }

  fn submit_boxed(&self, task: Box<dyn Task>, timeout: Duration) -> Result<ResultHandle, PoolError> {
    if self.state.load(AtomicOrdering::Acquire) != STATE_OPEN {
      debug!(pool = %self.name, "submission attempted on a closed pool");
      return Err(PoolError::PoolClosed);
    }

    let id = next_task_id();
    let (scope, scope_guard) = DeadlineScope::child_of(&self.shutdown_token, timeout);
    let (result_tx, result_rx) = mpsc::channel(RESULT_SINK_CAPACITY);

    self.metrics.task_submitted();

    let envelope = TaskEnvelope {
      id,
      task,
      scope,
      scope_guard,
      result_tx,
      timeout,
    };

    match self.queue_tx.try_send(envelope) {
      Ok(()) => {
        debug!(pool = %self.name, task_id = id, timeout_ms = timeout.as_millis() as u64, "task enqueued");
        Ok(ResultHandle::new(id, result_rx))
      }
      Err(TrySendError::Full(envelope)) => {
        // Dropping the envelope releases the just-created scope.
        drop(envelope);
        self.metrics.submission_rejected();
        if self.shutdown_token.is_cancelled() {
          Err(PoolError::PoolClosed)
        } else {
          debug!(pool = %self.name, task_id = id, "queue full, rejecting submission");
          Err(PoolError::PoolFull)
        }
      }
      Err(TrySendError::Closed(envelope)) => {
        drop(envelope);
        self.metrics.submission_rejected();
        warn!(pool = %self.name, task_id = id, "queue closed during submission");
        Err(PoolError::PoolClosed)
      }
    }
  }

  /// Submits a task and waits for its result.
  ///
  /// The only submission-family call whose caller may suspend. Submission
  /// failures and pool shutdown while waiting are folded into the returned
  /// [`TaskResult`] as its error.
  pub async fn submit_and_wait<T: Task>(&self, task: T) -> TaskResult {
    let handle = match self.submit(task) {
      Ok(handle) => handle,
      Err(err) => {
        return TaskResult {
          error: Some(err),
          ..TaskResult::default()
        }
      }
    };
    self.wait_for(handle).await
  }

  async fn wait_for(&self, handle: ResultHandle) -> TaskResult {
    let id = handle.id();
    tokio::select! {
      biased;

      received = handle.recv() => match received {
        Ok(result) => result,
        Err(_) if self.shutdown_token.is_cancelled() => TaskResult {
          id,
          error: Some(PoolError::PoolClosed),
          ..TaskResult::default()
        },
        Err(err) => TaskResult {
          id,
          error: Some(err),
          ..TaskResult::default()
        },
      },

      _ = self.shutdown_token.cancelled() => TaskResult {
        id,
        error: Some(PoolError::PoolClosed),
        ..TaskResult::default()
      },
    }
  }

  /// Submits every task and waits until each one has completed or failed.
  ///
  /// Slot `i` of the returned sequences belongs to the i-th task. Tasks run
  /// to completion independently: one failing never aborts the others.
  pub async fn submit_batch(&self, tasks: Vec<Box<dyn Task>>) -> BatchResult {
    let count = tasks.len();
    let mut results: Vec<Option<TaskResult>> = Vec::with_capacity(count);
    results.resize_with(count, || None);
    let mut errors: Vec<Option<PoolError>> = Vec::with_capacity(count);
    errors.resize_with(count, || None);

    let mut pending = Vec::with_capacity(count);
    for (index, task) in tasks.into_iter().enumerate() {
      match self.submit_boxed(task, self.config.task_timeout) {
        Ok(handle) => pending.push((index, handle)),
        Err(err) => errors[index] = Some(err),
      }
    }

    let outcomes = future::join_all(
      pending
        .into_iter()
        .map(|(index, handle)| async move { (index, self.wait_for(handle).await) }),
    )
    .await;

    for (index, result) in outcomes {
      match result.error {
        // Shutdown raced the wait; report it as a wait failure, the task
        // itself never produced an outcome for this slot.
        Some(PoolError::PoolClosed) => errors[index] = Some(PoolError::PoolClosed),
        _ => results[index] = Some(result),
      }
    }

    BatchResult { results, errors }
  }

  /// Closes the pool: stops accepting work, cancels every in-flight task
  /// scope, and waits for all workers to finish their current task and
  /// terminate. Idempotent; only the first caller runs the shutdown, later
  /// callers get [`PoolError::PoolClosed`] immediately.
  pub async fn close(&self) -> Result<(), PoolError> {
    if self
      .state
      .compare_exchange(
        STATE_OPEN,
        STATE_CLOSING,
        AtomicOrdering::AcqRel,
        AtomicOrdering::Acquire,
      )
      .is_err()
    {
      return Err(PoolError::PoolClosed);
    }

    info!(pool = %self.name, "initiating pool shutdown");
    self.shutdown_token.cancel();
    let _ = self.queue_tx.close();

    let handles: Vec<JoinHandle<()>> = {
      let mut guard = self.worker_handles.lock();
      guard.drain(..).collect()
    };

    for handle in handles {
      if let Err(join_error) = handle.await {
        error!(pool = %self.name, "error joining worker during shutdown: {join_error:?}");
      }
    }

    self.state.store(STATE_CLOSED, AtomicOrdering::Release);
    self.close_done.cancel();
    info!(pool = %self.name, "pool shutdown complete");
    Ok(())
  }

  /// Races [`close`](Self::close) against a timer.
  ///
  /// On timeout this returns [`PoolError::CloseTimeout`] while the shutdown
  /// keeps running unattended in the background; await
  /// [`closed`](Self::closed) to confirm completion later.
  pub async fn close_with_timeout(self: Arc<Self>, wait: Duration) -> Result<(), PoolError> {
    let pool = Arc::clone(&self);
    let close_task = self.tokio_handle.spawn(async move { pool.close().await });

    match timeout(wait, close_task).await {
      Ok(Ok(outcome)) => outcome,
      Ok(Err(join_error)) => {
        error!(pool = %self.name, "close task failed: {join_error:?}");
        Err(PoolError::PoolClosed)
      }
      Err(_) => {
        warn!(pool = %self.name, "close timed out, shutdown continues in the background");
        Err(PoolError::CloseTimeout)
      }
    }
  }

  /// Resolves once a shutdown started by [`close`](Self::close) or
  /// [`close_with_timeout`](Self::close_with_timeout) has fully completed.
  pub async fn closed(&self) {
    self.close_done.cancelled().await;
  }
}

impl Drop for Pool {
  fn drop(&mut self) {
    // Last handle gone without an explicit close: signal the workers and
    // refuse further producers. Never blocks; the runtime reaps the worker
    // tasks once they observe the token.
    if !self.shutdown_token.is_cancelled() {
      info!(pool = %self.name, "pool dropped without explicit close, signalling workers to stop");
      self.shutdown_token.cancel();
      let _ = self.queue_tx.close();
    }
  }
}
