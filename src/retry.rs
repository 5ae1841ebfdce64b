//! Bounded retry for external calls.
//!
//! A [`RetryPolicy`] is built from [`crate::config::RetryConfig`] and handed to
//! whoever talks to the store or the generator. Attempts are bounded by count
//! and each attempt is bounded by a hard timeout.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{RecallError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Treated as at least 1.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
    /// Upper bound on a single attempt. `None` disables the bound.
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            attempt_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Policy for store calls.
    pub fn for_store(config: &RetryConfig) -> Self {
        Self::from_config(config, config.store_delay_ms)
    }

    /// Policy for generator calls.
    pub fn for_generator(config: &RetryConfig) -> Self {
        Self::from_config(config, config.generator_delay_ms)
    }

    fn from_config(config: &RetryConfig, delay_ms: u64) -> Self {
        let policy = Self::new(config.max_attempts, Duration::from_millis(delay_ms));
        if config.attempt_timeout_secs > 0 {
            policy.with_timeout(Duration::from_secs(config.attempt_timeout_secs))
        } else {
            policy
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(RecallError::Timeout(limit)),
                },
                None => op().await,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        call = what,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "external call failed, retrying"
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_store(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = instant_policy(3)
            .run("test", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(RecallError::Store("flaky".into()))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = instant_policy(3)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RecallError::Store("down".into()))
            })
            .await;
        assert!(matches!(result, Err(RecallError::Store(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = instant_policy(3)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RecallError::UnknownSpeaker("Eve".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_timeout_is_enforced() {
        let policy = instant_policy(2).with_timeout(Duration::from_millis(20));
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy
            .run("slow", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(RecallError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let policy = instant_policy(0);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let calls = AtomicU32::new(0);
        let _ = rt.block_on(policy.run("once", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(RecallError::Store("x".into()))
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
