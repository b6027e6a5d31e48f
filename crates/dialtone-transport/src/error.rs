use serde::{Deserialize, Serialize};

/// A failed external call.
///
/// `code` is the remote error code when the service returned one
/// (`ResourceNotFoundException`, `ThrottlingException`), otherwise a local
/// classification such as `Http503` or `ConnectionError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TransportError {
  pub code: String,
  pub message: String,
  /// Whether repeating the same call might succeed.
  pub retryable: bool,
}

impl TransportError {
  pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      code: code.into(),
      message: message.into(),
      retryable: false,
    }
  }

  pub fn retryable(mut self, retryable: bool) -> Self {
    self.retryable = retryable;
    self
  }
}

impl From<reqwest::Error> for TransportError {
  fn from(e: reqwest::Error) -> Self {
    let code = if e.is_timeout() {
      "Timeout"
    } else if e.is_connect() {
      "ConnectionError"
    } else if e.is_decode() {
      "InvalidResponse"
    } else {
      "RequestError"
    };
    TransportError::new(code, e.to_string()).retryable(e.is_timeout() || e.is_connect())
  }
}
