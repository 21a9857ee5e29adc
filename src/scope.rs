use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

/// A cancellable, time-bounded execution context handed to every task.
///
/// Each scope is a child of the pool-wide cancellation token with a per-task
/// deadline on top: [`cancelled`](Self::cancelled) completes when the pool
/// shuts down or the deadline passes, whichever comes first. A scope only
/// affects the task it was created for; sibling tasks are untouched. Tasks
/// are expected to check their scope cooperatively at their own suspension
/// points.
#[derive(Debug, Clone)]
pub struct DeadlineScope {
  token: CancellationToken,
  deadline: Instant,
}

impl DeadlineScope {
  /// Derives a child scope of `parent` expiring after `timeout`.
  ///
  /// The returned guard cancels the scope when dropped, so whoever owns the
  /// guard releases the scope on every exit path.
  pub(crate) fn child_of(parent: &CancellationToken, timeout: Duration) -> (Self, DropGuard) {
    let token = parent.child_token();
    let guard = token.clone().drop_guard();
    (
      Self {
        token,
        deadline: Instant::now() + timeout,
      },
      guard,
    )
  }

  /// The absolute instant at which this scope expires.
  pub fn deadline(&self) -> Instant {
    self.deadline
  }

  /// Time left until the deadline, zero once expired.
  pub fn remaining(&self) -> Duration {
    self.deadline.saturating_duration_since(Instant::now())
  }

  /// Whether the deadline has passed.
  pub fn is_expired(&self) -> bool {
    Instant::now() >= self.deadline
  }

  /// Whether the scope was cancelled or has expired.
  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled() || self.is_expired()
  }

  /// Completes on cancellation or deadline expiry, whichever comes first.
  pub async fn cancelled(&self) {
    tokio::select! {
      _ = self.token.cancelled() => {}
      _ = tokio::time::sleep_until(self.deadline) => {}
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn scope_expires_after_timeout() {
    let parent = CancellationToken::new();
    let (scope, _guard) = DeadlineScope::child_of(&parent, Duration::from_millis(20));

    assert!(!scope.is_expired());
    assert!(!scope.is_cancelled());
    assert!(scope.remaining() > Duration::ZERO);

    tokio::time::sleep(Duration::from_millis(40)).await;

    assert!(scope.is_expired());
    assert!(scope.is_cancelled());
    assert_eq!(scope.remaining(), Duration::ZERO);
    // Must resolve immediately now that the deadline has passed.
    tokio::time::timeout(Duration::from_millis(10), scope.cancelled())
      .await
      .expect("cancelled() did not resolve for an expired scope");
  }

  #[tokio::test]
  async fn parent_cancellation_cascades_into_scope() {
    let parent = CancellationToken::new();
    let (scope, _guard) = DeadlineScope::child_of(&parent, Duration::from_secs(60));

    assert!(!scope.is_cancelled());
    parent.cancel();
    assert!(scope.is_cancelled());
    assert!(!scope.is_expired());
    tokio::time::timeout(Duration::from_millis(10), scope.cancelled())
      .await
      .expect("cancelled() did not resolve after parent cancellation");
  }

  #[tokio::test]
  async fn dropping_the_guard_releases_the_scope() {
    let parent = CancellationToken::new();
    let (scope, guard) = DeadlineScope::child_of(&parent, Duration::from_secs(60));

    drop(guard);
    assert!(scope.is_cancelled());
    assert!(!parent.is_cancelled());
  }
}
