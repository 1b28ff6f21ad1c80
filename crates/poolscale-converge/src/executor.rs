//! Convergence executor — one provisioning request, then a bounded wait.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use poolscale_core::ProvisioningPort;

use crate::error::{ExecutorError, ExecutorResult};

/// A single-unit change to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction<'a> {
    Add,
    Remove(&'a str),
}

impl fmt::Display for ScaleAction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleAction::Add => write!(f, "add a unit"),
            ScaleAction::Remove(id) => write!(f, "remove unit {id}"),
        }
    }
}

impl ScaleAction<'_> {
    /// Whether `observed` fully reflects this action applied to a pool
    /// of `previous` units.
    fn is_reflected(&self, previous: usize, observed: &[String]) -> bool {
        match self {
            ScaleAction::Add => {
                observed.len() == previous + 1 && observed.iter().all(|id| !id.is_empty())
            }
            ScaleAction::Remove(unit_id) => {
                observed.len() + 1 == previous && !observed.iter().any(|id| id == unit_id)
            }
        }
    }
}

/// How the wait for an accepted action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// The observed pool reflects the change.
    Confirmed { elapsed: Duration },
    /// The deadline passed first. The action was still accepted.
    TimedOut { elapsed: Duration },
    /// Shutdown was signalled while waiting.
    Cancelled,
}

/// Issues add/remove requests and waits for the pool to reflect them.
pub struct ConvergenceExecutor {
    provisioner: Arc<dyn ProvisioningPort>,
    poll_interval: Duration,
    timeout: Duration,
}

impl ConvergenceExecutor {
    pub fn new(
        provisioner: Arc<dyn ProvisioningPort>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            provisioner,
            poll_interval,
            timeout,
        }
    }

    /// Add one unit and wait for it to appear.
    pub async fn scale_out(&self, shutdown: watch::Receiver<bool>) -> ExecutorResult<Convergence> {
        self.execute(ScaleAction::Add, shutdown).await
    }

    /// Remove `unit_id` and wait for it to disappear.
    pub async fn scale_in(
        &self,
        unit_id: &str,
        shutdown: watch::Receiver<bool>,
    ) -> ExecutorResult<Convergence> {
        self.execute(ScaleAction::Remove(unit_id), shutdown).await
    }

    pub async fn execute(
        &self,
        action: ScaleAction<'_>,
        shutdown: watch::Receiver<bool>,
    ) -> ExecutorResult<Convergence> {
        if *shutdown.borrow() {
            debug!(%action, "shutdown requested, not starting action");
            return Ok(Convergence::Cancelled);
        }

        if let Err(e) = self.provisioner.probe().await {
            warn!(%action, error = %e, "provisioner unreachable, skipping action");
            return Err(ExecutorError::Unreachable(e));
        }

        let previous = self.provisioner.list_unit_ids().await?.len();
        if previous == 0 {
            warn!(%action, "pool is empty, skipping action");
            return Err(ExecutorError::PoolEmpty);
        }

        let accepted = match action {
            ScaleAction::Add => self.provisioner.add_unit().await,
            ScaleAction::Remove(unit_id) => self.provisioner.remove_unit(unit_id).await,
        };
        match accepted {
            Ok(true) => info!(%action, previous, "provisioning request accepted"),
            Ok(false) => {
                warn!(%action, previous, "provisioning request refused");
                return Err(ExecutorError::Rejected(action.to_string()));
            }
            Err(e) => {
                warn!(%action, error = %e, "provisioning request failed");
                return Err(e.into());
            }
        }

        Ok(self.await_convergence(action, previous, shutdown).await)
    }

    async fn await_convergence(
        &self,
        action: ScaleAction<'_>,
        previous: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> Convergence {
        let started = Instant::now();
        // No deadline when the timeout is too large to represent.
        let deadline = started.checked_add(self.timeout);

        loop {
            if *shutdown.borrow() {
                debug!(%action, "shutdown requested while converging");
                return Convergence::Cancelled;
            }

            match self.provisioner.list_unit_ids().await {
                Ok(observed) if action.is_reflected(previous, &observed) => {
                    let elapsed = started.elapsed();
                    info!(%action, elapsed_secs = elapsed.as_secs_f64(), "pool converged");
                    return Convergence::Confirmed { elapsed };
                }
                Ok(observed) => {
                    debug!(%action, previous, observed = observed.len(), "pool not converged yet");
                }
                Err(e) => {
                    debug!(%action, error = %e, "convergence poll failed, retrying");
                }
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                let elapsed = now - started;
                warn!(
                    %action,
                    timeout_secs = self.timeout.as_secs(),
                    "gave up waiting for the pool to converge"
                );
                return Convergence::TimedOut { elapsed };
            }

            let wake = match (now.checked_add(self.poll_interval), deadline) {
                (Some(next), Some(deadline)) => Some(next.min(deadline)),
                (next, None) => next,
                (None, deadline) => deadline,
            };
            tokio::select! {
                _ = sleep_until(wake) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(%action, "shutdown requested while converging");
                        return Convergence::Cancelled;
                    }
                }
            }
        }
    }
}

async fn sleep_until(wake: Option<Instant>) {
    match wake {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolscale_core::Unit;
    use poolscale_core::testing::FakePool;

    const POLL: Duration = Duration::from_secs(5);
    const TIMEOUT: Duration = Duration::from_secs(600);

    fn executor(pool: &Arc<FakePool>) -> ConvergenceExecutor {
        ConvergenceExecutor::new(pool.clone(), POLL, TIMEOUT)
    }

    #[tokio::test(start_paused = true)]
    async fn scale_out_confirms_after_lag() {
        let pool = Arc::new(FakePool::with_counts(2, 0).with_lag(3, 0));
        let (_tx, rx) = watch::channel(false);

        let outcome = executor(&pool).scale_out(rx).await.unwrap();
        assert!(matches!(outcome, Convergence::Confirmed { elapsed } if elapsed >= POLL * 2));
        assert_eq!(pool.unit_ids().len(), 3);
        assert_eq!(pool.add_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scale_out_waits_for_placeholder_identity() {
        let pool = Arc::new(FakePool::with_counts(1, 0).with_lag(0, 2));
        let (_tx, rx) = watch::channel(false);

        let outcome = executor(&pool).scale_out(rx).await.unwrap();
        // Size matches on the first poll, but the id only arrives two polls later.
        assert!(matches!(outcome, Convergence::Confirmed { elapsed } if elapsed == POLL * 2));
    }

    #[tokio::test(start_paused = true)]
    async fn scale_in_confirms_when_unit_gone() {
        let pool = Arc::new(FakePool::with_counts(1, 2).with_lag(1, 0));
        let (_tx, rx) = watch::channel(false);

        let outcome = executor(&pool).scale_in("idle-0", rx).await.unwrap();
        assert!(matches!(outcome, Convergence::Confirmed { .. }));
        assert_eq!(pool.unit_ids(), vec!["busy-0", "idle-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_error() {
        let pool = Arc::new(FakePool::with_counts(2, 0).with_lag(10_000, 0));
        let (_tx, rx) = watch::channel(false);

        let outcome = executor(&pool).scale_out(rx).await.unwrap();
        assert_eq!(outcome, Convergence::TimedOut { elapsed: TIMEOUT });
    }

    #[tokio::test(start_paused = true)]
    async fn tolerates_flaky_polls() {
        let pool = Arc::new(FakePool::with_counts(2, 0).with_lag(1, 0));
        let (_tx, rx) = watch::channel(false);
        let exec = executor(&pool);

        // Arm two list failures once the first poll has come back empty-handed.
        let flake = {
            let pool = pool.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                pool.fail_next_lists(2);
            }
        };
        let (outcome, ()) = tokio::join!(exec.scale_out(rx), flake);
        // Polls at 5s and 10s fail, the one at 15s sees the new unit.
        assert_eq!(
            outcome.unwrap(),
            Convergence::Confirmed {
                elapsed: POLL * 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_provisioner_is_not_mutated() {
        let pool = Arc::new(FakePool::with_counts(2, 0));
        pool.set_reachable(false);
        let (_tx, rx) = watch::channel(false);

        let err = executor(&pool).scale_out(rx).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Unreachable(_)));
        assert_eq!(pool.add_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pool_is_refused() {
        let pool = Arc::new(FakePool::new(Vec::new()));
        let (_tx, rx) = watch::channel(false);

        let err = executor(&pool).scale_out(rx).await.unwrap_err();
        assert!(matches!(err, ExecutorError::PoolEmpty));
        assert_eq!(pool.add_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_request_skips_polling() {
        let pool = Arc::new(FakePool::with_counts(2, 1));
        pool.set_accepting(false);
        let (_tx, rx) = watch::channel(false);

        let err = executor(&pool).scale_in("idle-0", rx).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Rejected(msg) if msg.contains("idle-0")));
        assert_eq!(pool.unit_ids().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_the_wait() {
        let pool = Arc::new(FakePool::with_counts(2, 0).with_lag(10_000, 0));
        let (tx, rx) = watch::channel(false);
        let exec = executor(&pool);

        let cancel = async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            let _ = tx.send(true);
            tx
        };
        let (outcome, _tx) = tokio::join!(exec.scale_out(rx), cancel);
        assert_eq!(outcome.unwrap(), Convergence::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn scale_in_unreachable_provisioner_is_not_mutated() {
        let pool = Arc::new(FakePool::with_counts(1, 2));
        pool.set_reachable(false);
        let (_tx, rx) = watch::channel(false);

        let err = executor(&pool).scale_in("idle-0", rx).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Unreachable(_)));
        assert_eq!(pool.remove_calls(), 0);
        assert_eq!(pool.unit_ids().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn scale_in_on_empty_pool_is_refused() {
        let pool = Arc::new(FakePool::new(Vec::new()));
        let (_tx, rx) = watch::channel(false);

        let err = executor(&pool).scale_in("idle-0", rx).await.unwrap_err();
        assert!(matches!(err, ExecutorError::PoolEmpty));
        assert_eq!(pool.remove_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scale_in_times_out_without_error() {
        let pool = Arc::new(FakePool::with_counts(1, 2).with_lag(10_000, 0));
        let (_tx, rx) = watch::channel(false);

        let outcome = executor(&pool).scale_in("idle-0", rx).await.unwrap();
        assert_eq!(outcome, Convergence::TimedOut { elapsed: TIMEOUT });
        assert_eq!(pool.remove_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scale_in_waits_for_the_named_unit_to_go() {
        // The pool shrinks by one, but the unit asked for is still listed.
        let pool = Arc::new(FakePool::with_counts(1, 2).with_lag(10_000, 0));
        let (_tx, rx) = watch::channel(false);
        let exec = executor(&pool);

        let shrink = {
            let pool = pool.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                pool.set_units(vec![Unit::busy("busy-0"), Unit::idle("idle-0")]);
            }
        };
        let (outcome, ()) = tokio::join!(exec.scale_in("idle-0", rx), shrink);
        assert_eq!(outcome.unwrap(), Convergence::TimedOut { elapsed: TIMEOUT });
        assert!(pool.unit_ids().contains(&"idle-0".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_timeout_waits_without_deadline() {
        let timeout = Duration::from_secs(9_300_000_000_000_000_000);
        let pool = Arc::new(FakePool::with_counts(2, 0).with_lag(3, 0));
        let (_tx, rx) = watch::channel(false);

        let exec = ConvergenceExecutor::new(pool.clone(), POLL, timeout);
        let outcome = exec.scale_out(rx).await.unwrap();
        assert!(matches!(outcome, Convergence::Confirmed { .. }));

        let (_tx, rx) = watch::channel(false);
        let exec = ConvergenceExecutor::new(pool.clone(), POLL, Duration::MAX);
        let outcome = exec.scale_in("busy-0", rx).await.unwrap();
        assert!(matches!(outcome, Convergence::Confirmed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_start_skips_the_request() {
        let pool = Arc::new(FakePool::with_counts(2, 1));
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let outcome = executor(&pool).scale_out(rx.clone()).await.unwrap();
        assert_eq!(outcome, Convergence::Cancelled);
        let outcome = executor(&pool).scale_in("idle-0", rx).await.unwrap();
        assert_eq!(outcome, Convergence::Cancelled);
        assert_eq!(pool.add_calls(), 0);
        assert_eq!(pool.remove_calls(), 0);
    }

    #[test]
    fn reflected_checks() {
        let ids = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert!(ScaleAction::Add.is_reflected(2, &ids(&["a", "b", "c"])));
        assert!(!ScaleAction::Add.is_reflected(2, &ids(&["a", "b", ""])));
        assert!(!ScaleAction::Add.is_reflected(2, &ids(&["a", "b"])));

        assert!(ScaleAction::Remove("b").is_reflected(3, &ids(&["a", "c"])));
        // Right size, but the wrong unit went away.
        assert!(!ScaleAction::Remove("b").is_reflected(3, &ids(&["a", "b"])));
    }
}
