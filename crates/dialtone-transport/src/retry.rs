use std::time::Duration;

use dialtone_config::RetryBackoff;
use serde::{Deserialize, Serialize};

/// Longest single wait between attempts.
const MAX_DELAY_MS: u64 = 30_000;

/// How a transport repeats calls that failed with a retryable error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
  /// Total attempts, including the first. `1` disables retries.
  pub max_attempts: u32,
  #[serde(default)]
  pub backoff: RetryBackoff,
  pub initial_delay_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      backoff: RetryBackoff::Exponential,
      initial_delay_ms: 200,
    }
  }
}

impl RetryPolicy {
  pub fn none() -> Self {
    Self {
      max_attempts: 1,
      ..Self::default()
    }
  }

  /// Wait before the attempt following failed attempt number `attempt`
  /// (1-based).
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let ms = match self.backoff {
      RetryBackoff::Constant => self.initial_delay_ms,
      RetryBackoff::Linear => self.initial_delay_ms.saturating_mul(attempt as u64),
      RetryBackoff::Exponential => {
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        self.initial_delay_ms.saturating_mul(factor)
      }
    };
    Duration::from_millis(ms.min(MAX_DELAY_MS))
  }

  pub fn should_retry(&self, attempt: u32) -> bool {
    attempt < self.max_attempts
  }
}
