//! In-strategy retry loop.

use std::time::Duration;

use super::{classify, FetchError, RetryDecision, RetryPolicy};
use crate::stall::CancelToken;

const BACKOFF_SLICE: Duration = Duration::from_millis(100);

/// Runs a strategy attempt until it succeeds, fails non-retryably, or the
/// budget is spent. Backoff sleeps are sliced so cancellation (stall or
/// shutdown) cuts the wait short.
pub fn run_with_retry<T, F>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut f: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Result<T, FetchError>,
{
    let mut attempt = 1u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                let class = classify(&e);
                match policy.decide(attempt, class) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(d) => {
                        tracing::debug!(error = %e, attempt, delay_ms = d.as_millis() as u64, "retrying in-strategy");
                        let mut remaining = d;
                        while !remaining.is_zero() {
                            if cancel.is_cancelled() {
                                return Err(cancel.to_error());
                            }
                            let slice = remaining.min(BACKOFF_SLICE);
                            std::thread::sleep(slice);
                            remaining -= slice;
                        }
                        attempt += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stall::CancelReason;

    #[test]
    fn returns_first_success() {
        let policy = RetryPolicy::with_attempts(3);
        let cancel = CancelToken::new();
        let mut calls = 0;
        let r: Result<u32, FetchError> = run_with_retry(&policy, &cancel, || {
            calls += 1;
            if calls < 2 {
                Err(FetchError::Http(503))
            } else {
                Ok(7)
            }
        });
        assert_eq!(r.unwrap(), 7);
        assert_eq!(calls, 2);
    }

    #[test]
    fn budget_exhaustion_returns_last_error() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let cancel = CancelToken::new();
        let mut calls = 0;
        let r: Result<(), FetchError> = run_with_retry(&policy, &cancel, || {
            calls += 1;
            Err(FetchError::Http(500))
        });
        assert_eq!(calls, 3);
        assert_eq!(r.unwrap_err().to_string(), "http_5xx:500");
    }

    #[test]
    fn non_retryable_returns_immediately() {
        let policy = RetryPolicy::with_attempts(5);
        let cancel = CancelToken::new();
        let mut calls = 0;
        let r: Result<(), FetchError> = run_with_retry(&policy, &cancel, || {
            calls += 1;
            Err(FetchError::ValidatorChanged)
        });
        assert_eq!(calls, 1);
        assert!(matches!(r.unwrap_err(), FetchError::ValidatorChanged));
    }

    #[test]
    fn cancellation_cuts_backoff_short() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
        };
        let cancel = CancelToken::new();
        cancel.cancel(CancelReason::Interrupted);
        let r: Result<(), FetchError> =
            run_with_retry(&policy, &cancel, || Err(FetchError::Http(500)));
        assert!(matches!(r.unwrap_err(), FetchError::Interrupted));
    }
}
