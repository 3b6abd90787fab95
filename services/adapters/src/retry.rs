//! Bounded exponential backoff

use crate::circuit_breaker::CircuitBreaker;
use crate::error::ErrorKind;
use crate::{AdapterError, Result};
use std::future::Future;
use std::time::Duration;
use sync_config::RetryConfig;
use tracing::{debug, warn};

/// Retry schedule for calls into one adapter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            multiplier: config.multiplier,
            max_delay: config.max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt`, counted from 0
    ///
    /// `min(base_delay * multiplier^attempt, max_delay)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Retries allowed after `error`
    pub fn retries_for(&self, error: &AdapterError) -> u32 {
        if !error.is_retryable() {
            return 0;
        }
        match error.kind() {
            ErrorKind::Network => self.max_retries,
            ErrorKind::ExternalService | ErrorKind::Unknown => self.max_retries.min(1),
            _ => 0,
        }
    }

    /// Run `operation` through `breaker`, retrying per this policy
    ///
    /// Whatever error ends the loop is returned as [`AdapterError::Upstream`]
    /// carrying `game_id`, its classification and the attempt count.
    pub async fn execute<T, F, Fut>(
        &self,
        game_id: &str,
        breaker: &CircuitBreaker,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match breaker.call(operation()).await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.retries_for(&error) => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        "{} attempt {} failed ({}), retrying in {:?}",
                        breaker.name(),
                        attempt + 1,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    let kind = error.kind();
                    warn!(
                        "{} failed after {} attempt(s) with {} error: {}",
                        breaker.name(),
                        attempt + 1,
                        kind,
                        error
                    );
                    return Err(AdapterError::Upstream {
                        game_id: game_id.to_string(),
                        kind,
                        attempts: attempt + 1,
                        cause: Box::new(error),
                    });
                }
            }
        }
    }
}
