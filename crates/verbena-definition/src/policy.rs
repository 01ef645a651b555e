use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for failed node executions.
///
/// Delays grow exponentially: `initial * multiplier^(attempt - 1)`, capped at
/// `max_delay_ms`. Only error codes listed in `retryable_errors` are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
  /// Total attempts including the first (1..=10).
  pub max_attempts: u32,
  pub initial_delay_ms: u64,
  pub max_delay_ms: u64,
  /// Exponential backoff multiplier (1.0..=10.0).
  pub backoff_multiplier: f64,
  /// Error codes that qualify for retry.
  #[serde(default)]
  pub retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_delay_ms: 1_000,
      max_delay_ms: 30_000,
      backoff_multiplier: 2.0,
      retryable_errors: Vec::new(),
    }
  }
}

impl RetryPolicy {
  pub const MIN_ATTEMPTS: u32 = 1;
  pub const MAX_ATTEMPTS: u32 = 10;
  pub const MIN_MULTIPLIER: f64 = 1.0;
  pub const MAX_MULTIPLIER: f64 = 10.0;

  /// Whether the given error code qualifies for retry.
  pub fn is_retryable(&self, error_code: &str) -> bool {
    self.retryable_errors.iter().any(|c| c == error_code)
  }

  /// Whether another attempt remains after `attempt` (1-based) has failed.
  pub fn has_attempts_remaining(&self, attempt: u32) -> bool {
    attempt < self.max_attempts
  }

  /// Backoff delay after the given failed attempt (1-based).
  ///
  /// Attempt 1 waits `initial_delay_ms`, attempt 2 waits
  /// `initial * multiplier`, and so on, capped at `max_delay_ms`.
  pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent as i32);
    let capped = raw.min(self.max_delay_ms as f64);
    Duration::from_millis(capped as u64)
  }

  /// Check the policy's value ranges.
  pub(crate) fn in_bounds(&self) -> bool {
    (Self::MIN_ATTEMPTS..=Self::MAX_ATTEMPTS).contains(&self.max_attempts)
      && (Self::MIN_MULTIPLIER..=Self::MAX_MULTIPLIER).contains(&self.backoff_multiplier)
  }
}

/// Saga-style compensation policy applied when a run fails unrecoverably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationPolicy {
  pub enabled: bool,
  pub strategy: CompensationStrategy,
  pub timeout_ms: u64,
  /// When true, a failing compensation step is surfaced in the run's
  /// terminal reason; compensation never turns a failed run successful.
  pub fail_on_compensation_error: bool,
}

impl Default for CompensationPolicy {
  fn default() -> Self {
    Self {
      enabled: false,
      strategy: CompensationStrategy::Sequential,
      timeout_ms: 60_000,
      fail_on_compensation_error: false,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStrategy {
  /// Undo completed nodes one at a time in reverse completion order.
  Sequential,
  /// Fire all eligible compensations concurrently.
  Parallel,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn policy() -> RetryPolicy {
    RetryPolicy {
      max_attempts: 3,
      initial_delay_ms: 1_000,
      max_delay_ms: 10_000,
      backoff_multiplier: 2.0,
      retryable_errors: vec!["TIMEOUT".to_string()],
    }
  }

  #[test]
  fn backoff_doubles_per_attempt() {
    let p = policy();
    assert_eq!(p.delay_after_attempt(1), Duration::from_secs(1));
    assert_eq!(p.delay_after_attempt(2), Duration::from_secs(2));
    assert_eq!(p.delay_after_attempt(3), Duration::from_secs(4));
  }

  #[test]
  fn backoff_is_capped_at_max_delay() {
    let p = policy();
    assert_eq!(p.delay_after_attempt(10), Duration::from_secs(10));
  }

  #[test]
  fn retryable_is_code_membership() {
    let p = policy();
    assert!(p.is_retryable("TIMEOUT"));
    assert!(!p.is_retryable("INVALID_INPUT"));
  }

  #[test]
  fn attempts_remaining_counts_the_first_attempt() {
    let p = policy();
    assert!(p.has_attempts_remaining(1));
    assert!(p.has_attempts_remaining(2));
    assert!(!p.has_attempts_remaining(3));
  }
}
