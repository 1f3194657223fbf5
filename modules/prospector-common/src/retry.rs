use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Exponential backoff: `base * 3^attempt` capped at `max`, plus up to one
/// second of random jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            attempts: 3,
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, attempts: u32) -> Self {
        Self { base, max, attempts }
    }

    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 3u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let jitter_ms = self.base.as_millis().min(1000) as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..jitter_ms))
        };
        self.delay(attempt) + jitter
    }

    /// Run `op` until it succeeds or attempts are exhausted, sleeping
    /// between failures. Returns the last error.
    pub async fn retry<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt + 1 < attempts => {
                    let backoff = self.delay_with_jitter(attempt);
                    warn!(
                        op = label,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
