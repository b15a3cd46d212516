//! Backoff for fetching remote proxy lists.
//!
//! Only the proxy list download is retried. Probes never are: a failed
//! probe is a measurement, not a glitch to hide.

use log::{debug, warn};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub retries: u32,
    /// Pause before the first retry; doubled for every further one.
    pub initial_backoff: Duration,
    /// Upper bound on a single pause.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn new(
        retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self { retries, initial_backoff, max_backoff }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self { retries: 0, ..Self::default() }
    }

    /// Pause before retry number `retry` (0-indexed).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// The operation failed on every attempt, or with a permanent error.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E: fmt::Display> fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed after {} attempt(s): {}", self.attempts, self.last)
    }
}

impl<E: Error + 'static> Error for Exhausted<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.last)
    }
}

/// Run `attempt` until it succeeds, fails permanently or runs out of
/// retries.
///
/// # Arguments
/// * `config` - Retry budget and backoff
/// * `what` - Operation name for the log
/// * `is_transient` - Whether an error is worth another attempt
/// * `attempt` - Produces one attempt
pub async fn retry_async<T, E, F, Fut, P>(
    config: &RetryConfig,
    what: &str,
    is_transient: P,
    mut attempt: F,
) -> Result<T, Exhausted<E>>
where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        let error = match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let retry = attempts - 1;
        if retry >= config.retries || !is_transient(&error) {
            warn!(
                "{}: giving up after {} attempt(s): {}",
                what, attempts, error
            );
            return Err(Exhausted { attempts, last: error });
        }

        let pause = config.backoff(retry);
        debug!(
            "{}: attempt {} failed ({}), retrying in {:?}",
            what, attempts, error, pause
        );
        sleep(pause).await;
    }
}

/// Whether a failed HTTP request may succeed when repeated: timeouts,
/// connection failures, 5xx and 429 answers.
pub fn is_transient_http(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        return true;
    }
    error.status().is_some_and(|status| {
        status.is_server_error()
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum Failure {
        Flaky,
        Broken,
    }

    impl fmt::Display for Failure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn flaky(failure: &Failure) -> bool {
        *failure == Failure::Flaky
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let config = RetryConfig::new(
            5,
            Duration::from_millis(100),
            Duration::from_millis(500),
        );
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(400));
        assert_eq!(config.backoff(3), Duration::from_millis(500));
        assert_eq!(config.backoff(40), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = Cell::new(0);
        let started = Instant::now();

        let result = retry_async(&RetryConfig::default(), "list", flaky, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { if n < 3 { Err(Failure::Flaky) } else { Ok(n) } }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        // 200ms + 400ms of backoff.
        assert_eq!(started.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_when_budget_spent() {
        let calls = Cell::new(0);
        let config = RetryConfig::new(
            2,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );

        let result: Result<(), _> = retry_async(&config, "list", flaky, || {
            calls.set(calls.get() + 1);
            async { Err(Failure::Flaky) }
        })
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(calls.get(), 3);
        assert_eq!(exhausted.to_string(), "failed after 3 attempt(s): Flaky");
    }

    #[tokio::test]
    async fn test_permanent_error_stops_immediately() {
        let calls = Cell::new(0);

        let result: Result<(), _> =
            retry_async(&RetryConfig::default(), "list", flaky, || {
                calls.set(calls.get() + 1);
                async { Err(Failure::Broken) }
            })
            .await;

        assert_eq!(result.unwrap_err().last, Failure::Broken);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_none_is_single_attempt() {
        let calls = Cell::new(0);

        let _: Result<(), _> =
            retry_async(&RetryConfig::none(), "list", flaky, || {
                calls.set(calls.get() + 1);
                async { Err(Failure::Flaky) }
            })
            .await;

        assert_eq!(calls.get(), 1);
    }
}
