use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::error::{AssistantError, Result};

const MAX_DELAY: Duration = Duration::from_secs(30);

/// Delay schedule between attempts. `attempt` is 1-based (the attempt
/// that just failed).
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// base, 2*base, 3*base, ...
    Linear { base: Duration },
    /// base, 2*base, 4*base, ... with +/-20% jitter.
    Exponential { base: Duration },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = match self {
            Backoff::Linear { base } => base.saturating_mul(attempt),
            Backoff::Exponential { base } => {
                let scaled = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
                let jitter = rand::thread_rng().gen_range(0.8..=1.2);
                Duration::from_millis((scaled.as_millis() as f64 * jitter) as u64)
            }
        };
        std::cmp::min(raw, MAX_DELAY)
    }
}

/// Composable retry policy applied at client boundaries: a bounded number
/// of attempts, a backoff schedule, and a predicate selecting which
/// errors are worth repeating.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub retryable: fn(&AssistantError) -> bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
            retryable: AssistantError::is_transient,
        }
    }

    /// Run `op` until it succeeds, the error is non-retryable, or the
    /// attempt budget is spent. Sleeps the caller between attempts.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && (self.retryable)(&e) => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
