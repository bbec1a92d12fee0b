//! Centralized retry control with bounded exponential backoff.
//!
//! Every operation that touches the database or the browser goes through
//! [`RetryPolicy::run`], parameterized by an error-classification function.
//! Retry policy is defined once here, not at call sites.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::error::RetryClass;
use crate::infrastructure::config::RetryConfig;

/// Async hook invoked before the next attempt when a failure was classified
/// [`RetryClass::RetryableRecycle`]. The store uses it to discard a suspect
/// pool connection.
pub type RecycleHook<'a> =
    &'a (dyn Fn() -> futures::future::BoxFuture<'static, ()> + Send + Sync);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, max_delay }
    }

    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self::new(
            cfg.max_attempts,
            Duration::from_millis(cfg.base_delay_ms),
            Duration::from_secs(cfg.max_delay_secs),
        )
    }

    /// Same delays, different attempt budget. Used for best-effort work like
    /// enrichment lookups.
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1), ..self.clone() }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before attempt `attempt` (1-based), capped, with a little
    /// jitter so concurrent item tasks don't wake in lockstep.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        let jitter_ms = fastrand::u64(0..=(exp.as_millis() as u64 / 4).max(1));
        exp + Duration::from_millis(jitter_ms)
    }

    /// Run `op`, retrying on `Retryable`/`RetryableRecycle` classifications
    /// until the attempt budget is exhausted. A `Fatal` classification and
    /// the final exhausted attempt both return the error unchanged.
    pub async fn run<T, E, Op, Fut, C>(&self, label: &str, classify: C, mut op: Op) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryClass,
        E: std::fmt::Display,
    {
        self.run_with_recycle(label, classify, None, &mut op).await
    }

    /// As [`Self::run`], with a recycle hook for `RetryableRecycle` failures.
    pub async fn run_with_recycle<T, E, Op, Fut, C>(
        &self,
        label: &str,
        classify: C,
        recycle: Option<RecycleHook<'_>>,
        op: &mut Op,
    ) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryClass,
        E: std::fmt::Display,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let class = classify(&err);
                    if class == RetryClass::Fatal {
                        debug!(label, %err, "fatal error, not retrying");
                        return Err(err);
                    }
                    if attempt >= self.max_attempts {
                        warn!(label, attempt, %err, "retry budget exhausted");
                        return Err(err);
                    }
                    if class == RetryClass::RetryableRecycle {
                        if let Some(hook) = recycle {
                            hook().await;
                        }
                    }
                    let delay = self.backoff(attempt);
                    warn!(label, attempt, delay_ms = delay.as_millis() as u64, %err,
                        "transient failure, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[tokio::test]
    async fn retryable_error_is_attempted_exactly_max_attempts_times() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), String> = quick_policy(4)
            .run("always-fails", |_| RetryClass::Retryable, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("lock timeout".to_string()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(result.unwrap_err(), "lock timeout");
    }

    #[tokio::test]
    async fn fatal_error_is_attempted_exactly_once() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), String> = quick_policy(5)
            .run("fatal", |_| RetryClass::Fatal, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("constraint violation".to_string()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, String> = quick_policy(5)
            .run("flaky", |_| RetryClass::Retryable, || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("busy".to_string())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recycle_hook_runs_before_the_next_attempt() {
        let recycled = Arc::new(AtomicU32::new(0));
        let attempts = AtomicU32::new(0);
        let hook_counter = Arc::clone(&recycled);
        let hook = move || {
            let counter = Arc::clone(&hook_counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }) as futures::future::BoxFuture<'static, ()>
        };
        let mut op = || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 2 {
                    Err("connection reset".to_string())
                } else {
                    Ok(())
                }
            }
        };
        let result: Result<(), String> = quick_policy(3)
            .run_with_recycle(
                "recycling",
                |_| RetryClass::RetryableRecycle,
                Some(&hook),
                &mut op,
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(recycled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_capped() {
        let policy =
            RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(8));
        // attempt 5 would be 16s uncapped; cap is 8s plus at most 25% jitter.
        let delay = policy.backoff(5);
        assert!(delay >= Duration::from_secs(8));
        assert!(delay <= Duration::from_secs(10));
    }
}
