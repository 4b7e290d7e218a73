//! Bounded one-shot background execution with a hard wall-clock deadline.
//!
//! The operation runs on a spawned worker task so the caller keeps control
//! of the deadline. When the deadline elapses the worker is abandoned via
//! abort and the caller gets `TimedOut` immediately; anything the worker
//! left on disk is the lifecycle manager's problem, since the worker's own
//! cleanup never ran.

use std::future::Future;
use std::time::Duration;

use crate::providers::ProviderFailure;

/// Lifecycle of one bounded execution.
///
/// `Pending -> Running -> {Completed, Failed, TimedOut}`; the three
/// right-hand states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::TimedOut
        )
    }
}

/// Terminal result of a bounded execution.
#[derive(Debug)]
pub enum BoundedOutcome<T> {
    Completed(T),
    Failed(ProviderFailure),
    TimedOut,
}

impl<T> BoundedOutcome<T> {
    /// The terminal state this outcome corresponds to.
    pub fn state(&self) -> RunState {
        match self {
            BoundedOutcome::Completed(_) => RunState::Completed,
            BoundedOutcome::Failed(_) => RunState::Failed,
            BoundedOutcome::TimedOut => RunState::TimedOut,
        }
    }
}

/// Run `op` on a worker task under a hard deadline.
///
/// Exactly one worker is outstanding per call; no retry is performed after
/// a timeout. The aborted worker's task is dropped, which also reaps any
/// child process spawned with `kill_on_drop`.
pub async fn run_with_timeout<T, F>(
    label: &str,
    timeout: Duration,
    op: F,
) -> BoundedOutcome<T>
where
    F: Future<Output = Result<T, ProviderFailure>> + Send + 'static,
    T: Send + 'static,
{
    log::debug!("bounded run '{}' pending (deadline {:?})", label, timeout);
    let mut worker = tokio::spawn(op);
    log::debug!("bounded run '{}' running", label);

    match tokio::time::timeout(timeout, &mut worker).await {
        Ok(Ok(Ok(value))) => {
            log::debug!("bounded run '{}' completed", label);
            BoundedOutcome::Completed(value)
        }
        Ok(Ok(Err(failure))) => {
            log::warn!("bounded run '{}' failed: {}", label, failure);
            BoundedOutcome::Failed(failure)
        }
        Ok(Err(join_error)) => {
            log::error!("bounded run '{}' worker died: {}", label, join_error);
            BoundedOutcome::Failed(ProviderFailure::process_error(format!(
                "worker task died: {}",
                join_error
            )))
        }
        Err(_) => {
            log::warn!(
                "bounded run '{}' exceeded its {:?} deadline, abandoning worker",
                label,
                timeout
            );
            worker.abort();
            BoundedOutcome::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Pending.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(RunState::TimedOut.is_terminal());
    }

    #[tokio::test]
    async fn test_completed_outcome_carries_value() {
        let outcome =
            run_with_timeout("ok", Duration::from_secs(5), async { Ok(42u32) }).await;
        match outcome {
            BoundedOutcome::Completed(value) => assert_eq!(value, 42),
            other => panic!("expected Completed, got {:?}", other.state()),
        }
    }

    #[tokio::test]
    async fn test_failed_outcome_carries_failure() {
        let outcome = run_with_timeout("fail", Duration::from_secs(5), async {
            Err::<u32, _>(ProviderFailure::process_error("exit 1"))
        })
        .await;
        match outcome {
            BoundedOutcome::Failed(failure) => assert!(failure.detail.contains("exit 1")),
            other => panic!("expected Failed, got {:?}", other.state()),
        }
    }

    #[tokio::test]
    async fn test_slow_operation_times_out_within_bound() {
        let start = Instant::now();
        let outcome = run_with_timeout("slow", Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(0u32)
        })
        .await;

        assert!(matches!(outcome, BoundedOutcome::TimedOut));
        // Returned at the deadline, not after the operation finished.
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_outcome_state_mapping() {
        let completed =
            run_with_timeout("a", Duration::from_secs(1), async { Ok(()) }).await;
        assert_eq!(completed.state(), RunState::Completed);

        let timed_out = run_with_timeout("b", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert_eq!(timed_out.state(), RunState::TimedOut);
    }
}
