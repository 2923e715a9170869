use crate::config::OrchestratorSettings;
use crate::errors::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded exponential backoff for transient failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one (default: 3)
    pub max_attempts: usize,
    /// Delay before the second attempt (default: 100ms)
    pub initial_backoff: Duration,
    /// Ceiling for any single delay (default: 5000ms)
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(5000),
        }
    }
}

impl From<&OrchestratorSettings> for RetryPolicy {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_backoff: settings.initial_backoff,
            max_backoff: settings.max_backoff,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based): initial * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only errors for which `AppError::is_transient` holds are retried.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        what,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "[ORCH] transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
