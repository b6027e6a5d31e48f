/// Error type for result lookups and state persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The operation has no successful result to read from.
  #[error("operation '{operation}' has not succeeded (state: {state})")]
  NotSucceeded { operation: String, state: String },

  /// The operation succeeded but its response has no such field.
  #[error("field '{path}' not found in response of operation '{operation}'")]
  FieldNotFound { operation: String, path: String },

  /// The operation was never registered with the store.
  #[error("unknown operation: {0}")]
  UnknownOperation(String),

  /// A record was moved to a state it cannot reach from its current one.
  #[error("invalid transition for operation '{operation}': {from} -> {to}")]
  InvalidTransition {
    operation: String,
    from: String,
    to: String,
  },

  #[error("state io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("state serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}
