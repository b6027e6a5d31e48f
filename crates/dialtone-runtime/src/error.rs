//! Runtime error types.

use dialtone_store::StoreError;
use dialtone_transport::TransportError;

/// Errors that abort a whole run.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// The result store rejected a state change.
  #[error("store error: {0}")]
  Store(#[from] StoreError),
}

/// Why a single operation failed. Recorded in the run report; never aborts
/// the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NodeError {
  /// A deferred reference could not be read from the result store.
  #[error("unresolved dependency '{reference}': {reason}")]
  UnresolvedDependency { reference: String, reason: String },

  /// The external call failed.
  #[error("transport error: {0}")]
  Transport(#[from] TransportError),

  /// The idempotency key could not be computed.
  #[error("key derivation failed: {message}")]
  KeyDerivation { message: String },

  /// Update or delete of a response-keyed operation whose key is neither
  /// cached nor found by lookup.
  #[error("no idempotency key is known and no lookup found the resource")]
  MissingKey,

  /// The task executing the operation panicked or was aborted. The call may
  /// or may not have reached the transport.
  #[error("operation task did not complete: {message}")]
  Panicked { message: String },

  /// Repeating the create call produced a different key than the cached one.
  #[error("derived key '{derived}' differs from cached key '{cached}'")]
  UnstableKey { cached: String, derived: String },
}
