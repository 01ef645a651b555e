use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a presented token was rejected.
///
/// A rejected token means the result it accompanies must be dropped: it
/// belongs to a superseded attempt or arrived after its window closed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
  #[error("execution token expired at {expired_at}")]
  Expired { expired_at: DateTime<Utc> },

  #[error("token is bound to run '{expected}', result is for run '{actual}'")]
  RunMismatch { expected: String, actual: String },

  #[error("token is bound to node '{expected}', result is for node '{actual}'")]
  NodeMismatch { expected: String, actual: String },

  #[error("token is bound to attempt {expected}, result is for attempt {actual}")]
  AttemptMismatch { expected: u32, actual: u32 },
}

/// Single-use, time-bound credential binding a result report to one
/// `(run, node, attempt)`.
///
/// Minted once per dispatch attempt; a retry invalidates the previous
/// attempt's token by carrying a higher attempt number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionToken {
  pub token: String,
  pub run_id: String,
  pub node_id: String,
  pub attempt: u32,
  pub expires_at: DateTime<Utc>,
}

impl ExecutionToken {
  /// Check the token against the result's claimed identity at `now`.
  pub fn validate(
    &self,
    run_id: &str,
    node_id: &str,
    attempt: u32,
    now: DateTime<Utc>,
  ) -> Result<(), TokenError> {
    if self.run_id != run_id {
      return Err(TokenError::RunMismatch {
        expected: self.run_id.clone(),
        actual: run_id.to_string(),
      });
    }
    if self.node_id != node_id {
      return Err(TokenError::NodeMismatch {
        expected: self.node_id.clone(),
        actual: node_id.to_string(),
      });
    }
    if self.attempt != attempt {
      return Err(TokenError::AttemptMismatch {
        expected: self.attempt,
        actual: attempt,
      });
    }
    if now > self.expires_at {
      return Err(TokenError::Expired {
        expired_at: self.expires_at,
      });
    }
    Ok(())
  }
}

/// Mints execution tokens with a fixed time-to-live.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
  ttl: Duration,
}

impl Default for TokenIssuer {
  fn default() -> Self {
    Self {
      ttl: Duration::minutes(15),
    }
  }
}

impl TokenIssuer {
  pub fn new(ttl: Duration) -> Self {
    Self { ttl }
  }

  /// Mint a fresh token for one dispatch attempt.
  pub fn issue(&self, run_id: &str, node_id: &str, attempt: u32) -> ExecutionToken {
    ExecutionToken {
      token: uuid::Uuid::new_v4().to_string(),
      run_id: run_id.to_string(),
      node_id: node_id.to_string(),
      attempt,
      expires_at: Utc::now() + self.ttl,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn valid_token_passes() {
    let token = TokenIssuer::default().issue("run-1", "a", 1);
    assert!(token.validate("run-1", "a", 1, Utc::now()).is_ok());
  }

  #[test]
  fn expired_token_is_rejected() {
    let token = TokenIssuer::new(Duration::seconds(-1)).issue("run-1", "a", 1);
    assert!(matches!(
      token.validate("run-1", "a", 1, Utc::now()),
      Err(TokenError::Expired { .. })
    ));
  }

  #[test]
  fn attempt_mismatch_is_rejected() {
    // A pre-retry attempt's token presented after attempt 2 was dispatched.
    let token = TokenIssuer::default().issue("run-1", "a", 1);
    assert_eq!(
      token.validate("run-1", "a", 2, Utc::now()),
      Err(TokenError::AttemptMismatch {
        expected: 1,
        actual: 2
      })
    );
  }

  #[test]
  fn tokens_are_unique_per_mint() {
    let issuer = TokenIssuer::default();
    let first = issuer.issue("run-1", "a", 1);
    let second = issuer.issue("run-1", "a", 2);
    assert_ne!(first.token, second.token);
  }
}
