//! Retry and backoff policy applied to each provider invocation.
//!
//! Only transient failures (network blips, remote capacity signals) are
//! retried; bad input and credential problems fail immediately.

use std::path::Path;
use std::time::Duration;

use super::{Provider, ProviderFailure, ProviderInput};

/// Per-adapter retry tuning.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per provider, including the first one.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub backoff_base: Duration,
    /// Cap on any single backoff delay.
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
        }
    }
}

/// Calculate the exponential backoff delay for a zero-based attempt index.
///
/// Uses `min(base * 2^attempt, max)`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
}

/// Invoke a provider, retrying retryable failures per the policy.
///
/// Returns the first non-retryable failure immediately, or the last
/// retryable failure once attempts are exhausted.
pub async fn invoke_with_retry(
    provider: &dyn Provider,
    input: &ProviderInput<'_>,
    dest: &Path,
    policy: &RetryPolicy,
) -> Result<(), ProviderFailure> {
    let attempts = policy.max_attempts.max(1);
    let mut last_failure = None;

    for attempt in 0..attempts {
        match provider.invoke(input, dest).await {
            Ok(()) => return Ok(()),
            Err(failure) if failure.is_retryable() => {
                log::warn!(
                    "provider '{}' attempt {}/{} failed: {}",
                    provider.name(),
                    attempt + 1,
                    attempts,
                    failure
                );
                last_failure = Some(failure);

                if attempt + 1 < attempts {
                    let delay =
                        calculate_backoff(attempt, policy.backoff_base, policy.backoff_max);
                    log::debug!(
                        "retrying provider '{}' in {:?}",
                        provider.name(),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
            Err(failure) => return Err(failure),
        }
    }

    Err(last_failure
        .unwrap_or_else(|| ProviderFailure::unavailable("retry attempts exhausted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Capability;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        calls: AtomicU32,
        fail_first: u32,
        failure: fn() -> ProviderFailure,
    }

    #[async_trait::async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        fn capability(&self) -> Capability {
            Capability::Tts
        }

        async fn invoke(
            &self,
            _input: &ProviderInput<'_>,
            _dest: &Path,
        ) -> Result<(), ProviderFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err((self.failure)())
            } else {
                Ok(())
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
        }
    }

    fn text_input() -> ProviderInput<'static> {
        ProviderInput::Text {
            text: "hello",
            language: "en",
            voice_id: None,
            slow: false,
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(60);
        assert_eq!(calculate_backoff(0, base, max), Duration::from_millis(500));
        assert_eq!(calculate_backoff(1, base, max), Duration::from_secs(1));
        assert_eq!(calculate_backoff(2, base, max), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_respects_cap() {
        let delay = calculate_backoff(20, Duration::from_secs(1), Duration::from_secs(8));
        assert_eq!(delay, Duration::from_secs(8));
    }

    #[test]
    fn test_default_policy_allows_three_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts, 3);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_until_success() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 2,
            failure: || ProviderFailure::transient("reset"),
        };

        let result =
            invoke_with_retry(&provider, &text_input(), Path::new("/tmp/out"), &fast_policy())
                .await;

        assert!(result.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unavailable_failures_are_retried() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 1,
            failure: || ProviderFailure::unavailable("busy"),
        };

        let result =
            invoke_with_retry(&provider, &text_input(), Path::new("/tmp/out"), &fast_policy())
                .await;

        assert!(result.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_failure() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            failure: || ProviderFailure::transient("reset"),
        };

        let result =
            invoke_with_retry(&provider, &text_input(), Path::new("/tmp/out"), &fast_policy())
                .await;

        assert!(result.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_bad_input_is_never_retried() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            failure: || ProviderFailure::bad_input("empty"),
        };

        let result =
            invoke_with_retry(&provider, &text_input(), Path::new("/tmp/out"), &fast_policy())
                .await;

        assert!(result.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_is_never_retried() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            failure: || ProviderFailure::auth("bad key"),
        };

        let result =
            invoke_with_retry(&provider, &text_input(), Path::new("/tmp/out"), &fast_policy())
                .await;

        assert!(result.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
