//! Bounded retry with per-attempt timeout and exponential backoff.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::{AgentError, AgentResult};
use crate::config::ProviderConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            initial_backoff: Duration::from_millis(config.backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(config.backoff_ms)),
        }
    }

    /// Single attempt, no waiting. Handy for tests.
    pub fn immediate() -> Self {
        Self {
            max_attempts: 1,
            timeout: Duration::from_secs(5),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Run `op` until it succeeds or the attempts run out.
    pub async fn run<T, F, Fut>(&self, call: &str, mut op: F) -> AgentResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.max_attempts {
            match timeout(self.timeout, op()).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", call, attempt);
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => last_error = format!("{:#}", e),
                Err(_) => last_error = format!("timed out after {:?}", self.timeout),
            }

            if attempt < self.max_attempts {
                let wait = self.backoff_for(attempt);
                warn!("{} attempt {}/{} failed ({}); retrying in {:?}", call, attempt, self.max_attempts, last_error, wait);
                sleep(wait).await;
            }
        }

        Err(AgentError::Provider {
            call: call.to_string(),
            turn: None,
            attempts: self.max_attempts,
            message: last_error,
        })
    }
}
