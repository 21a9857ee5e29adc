use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Point-in-time snapshot of a pool's execution metrics.
///
/// The five counters are read atomically but independently; the two timing
/// fields are read together under the registry's lock. The snapshot as a
/// whole is eventually consistent across fields: `tasks_submitted` is
/// always at least `tasks_completed + tasks_failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
  pub tasks_submitted: u64,
  pub tasks_completed: u64,
  pub tasks_failed: u64,
  pub active_workers: i64,
  pub queued_tasks: i64,
  pub total_execution_time: Duration,
  pub average_execution_time: Duration,
}

#[derive(Default)]
struct ExecutionTimings {
  total: Duration,
  average: Duration,
}

/// Shared counter block behind every pool.
///
/// Task counters honor `enable_metrics`; the worker gauge is maintained
/// unconditionally because idle eviction reads it.
pub(crate) struct MetricsRegistry {
  enabled: bool,
  tasks_submitted: AtomicU64,
  tasks_completed: AtomicU64,
  tasks_failed: AtomicU64,
  active_workers: AtomicI64,
  queued_tasks: AtomicI64,
  // Average is derived from total and the completed count, so the pair is
  // only ever touched inside this short critical section.
  timings: Mutex<ExecutionTimings>,
}

impl MetricsRegistry {
  pub(crate) fn new(enabled: bool) -> Self {
    Self {
      enabled,
      tasks_submitted: AtomicU64::new(0),
      tasks_completed: AtomicU64::new(0),
      tasks_failed: AtomicU64::new(0),
      active_workers: AtomicI64::new(0),
      queued_tasks: AtomicI64::new(0),
      timings: Mutex::new(ExecutionTimings::default()),
    }
  }

  pub(crate) fn task_submitted(&self) {
    if self.enabled {
      self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
      self.queued_tasks.fetch_add(1, Ordering::Relaxed);
    }
  }

  /// Rolls back [`task_submitted`](Self::task_submitted) for an enqueue
  /// that was rejected.
  pub(crate) fn submission_rejected(&self) {
    if self.enabled {
      self.tasks_submitted.fetch_sub(1, Ordering::Relaxed);
      self.queued_tasks.fetch_sub(1, Ordering::Relaxed);
    }
  }

  /// Records one finished execution: outcome counter, queue depth and
  /// execution timings. Timings accumulate for failures as well; the
  /// average is taken over completed tasks.
  pub(crate) fn task_finished(&self, failed: bool, duration: Duration) {
    if !self.enabled {
      return;
    }
    self.queued_tasks.fetch_sub(1, Ordering::Relaxed);
    if failed {
      self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    } else {
      self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    let completed = self.tasks_completed.load(Ordering::Relaxed);
    let mut timings = self.timings.lock();
    timings.total += duration;
    if let Some(average) = timings.total.checked_div(completed as u32) {
      timings.average = average;
    }
  }

  pub(crate) fn worker_started(&self) {
    self.active_workers.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn worker_stopped(&self) {
    self.active_workers.fetch_sub(1, Ordering::Relaxed);
  }

  /// Retires one worker unless it is the last one alive. Check and
  /// decrement are a single atomic update, so concurrent retirements can
  /// never drop the pool below one worker.
  pub(crate) fn try_retire_worker(&self) -> bool {
    self
      .active_workers
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |alive| {
        if alive > 1 {
          Some(alive - 1)
        } else {
          None
        }
      })
      .is_ok()
  }

  pub(crate) fn active_workers(&self) -> i64 {
    self.active_workers.load(Ordering::Relaxed)
  }

  pub(crate) fn snapshot(&self) -> PoolMetrics {
    let (total, average) = {
      let timings = self.timings.lock();
      (timings.total, timings.average)
    };
    PoolMetrics {
      tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
      tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
      tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
      active_workers: self.active_workers.load(Ordering::Relaxed),
      queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
      total_execution_time: total,
      average_execution_time: average,
    }
  }
}
