//! Bounded retry with randomized backoff for extraction calls and channel sends

use std::fmt;
use std::future::Future;

use tracing::warn;

use crate::promo_engine::errors::RetryExhausted;
use crate::promo_engine::rate_limiter::Pacer;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Pacer,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, Pacer::from_secs(2.0, 5.0))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Pacer) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `op` until it succeeds or `max_attempts` consecutive failures,
    /// sleeping a randomized backoff between attempts. `op` receives the
    /// 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        E: fmt::Display + fmt::Debug,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RetryExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    warn!("Attempt {}/{} of {} failed: {}", attempt, self.max_attempts, operation, e);
                    self.backoff.pause().await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn instant_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Pacer::none())
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result: Result<&str, _> = instant_policy(3)
            .run("fetch", |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 3 {
                        Err(format!("boom {attempt}"))
                    } else {
                        Ok("page")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "page");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let calls = Cell::new(0);
        let result: Result<(), _> = instant_policy(3)
            .run("send", |attempt| {
                calls.set(calls.get() + 1);
                async move { Err(format!("failure {attempt}")) }
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last_error, "failure 3");
        assert_eq!(exhausted.operation, "send");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = Cell::new(0);
        let _: Result<(), _> = instant_policy(0)
            .run("noop", |_| {
                calls.set(calls.get() + 1);
                async { Err("nope") }
            })
            .await;
        assert_eq!(calls.get(), 1);
    }
}
