use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    Exponential { initial_ms: u64, max_ms: u64 },
    /// Full jitter: uniformly random up to the capped exponential delay.
    Jittered { base_ms: u64, max_ms: u64 },
}

impl Backoff {
    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { initial_ms, max_ms } => {
                Duration::from_millis(Self::capped(initial_ms, max_ms, retry))
            }
            Backoff::Jittered { base_ms, max_ms } => {
                let cap = Self::capped(base_ms, max_ms, retry);
                Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
            }
        }
    }

    fn capped(initial_ms: u64, max_ms: u64, retry: u32) -> u64 {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        initial_ms.saturating_mul(factor).min(max_ms)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed { delay_ms: 1000 }
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Run `f` until it succeeds or `max_attempts` attempts have failed.
    /// `f` receives the 1-based attempt number.
    pub async fn run<F, Fut, T, E>(
        &self,
        operation_name: &str,
        sleeper: &dyn Sleeper,
        mut f: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match f(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempts = attempt,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "Operation failed after max attempts"
                        );
                        return Err(e);
                    }

                    let backoff = self.backoff.delay(attempt - 1);
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );

                    sleeper.sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
