//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Retries after the first attempt
  pub max_retries: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 2,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(5),
    }
  }
}

impl RetryPolicy {
  /// A policy that never retries.
  pub fn never() -> Self {
    Self {
      max_retries: 0,
      ..Self::default()
    }
  }

  /// Delay before the retry that follows `failures` consecutive failures
  /// (1-based): base, 2 * base, 4 * base, ... capped at `max_delay`.
  pub fn delay_for(&self, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1);
    self
      .base_delay
      .saturating_mul(2u32.saturating_pow(exponent))
      .min(self.max_delay)
  }

  pub fn should_retry(&self, failures: u32, error: &ApiError) -> bool {
    failures <= self.max_retries && error.is_retryable()
  }

  /// Run `attempt` until it succeeds, fails with a non-retryable error, or
  /// the retry budget is spent.
  pub async fn run<T, F, Fut>(&self, label: &str, mut attempt: F) -> Result<T, ApiError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
  {
    let mut failures = 0u32;
    loop {
      match attempt().await {
        Ok(value) => return Ok(value),
        Err(error) => {
          failures += 1;
          if !self.should_retry(failures, &error) {
            return Err(error);
          }
          let delay = self.delay_for(failures);
          warn!(
            query = label,
            error = %error,
            retry = failures,
            delay_ms = delay.as_millis() as u64,
            "request failed, retrying"
          );
          tokio::time::sleep(delay).await;
        }
      }
    }
  }
}
