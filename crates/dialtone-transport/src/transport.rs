use async_trait::async_trait;
use dialtone_config::FieldPath;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// One external call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
  pub action: String,
  pub parameters: serde_json::Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub idempotency_key: Option<String>,
}

impl Request {
  pub fn new(action: impl Into<String>, parameters: serde_json::Value) -> Self {
    Self {
      action: action.into(),
      parameters,
      idempotency_key: None,
    }
  }

  pub fn with_key(mut self, key: Option<String>) -> Self {
    self.idempotency_key = key;
    self
  }
}

/// Structured result of a successful call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Response(serde_json::Value);

impl Response {
  pub fn new(body: serde_json::Value) -> Self {
    Self(body)
  }

  pub fn body(&self) -> &serde_json::Value {
    &self.0
  }

  /// Read a field by dot-separated path (`Queues.0.QueueId`).
  pub fn field(&self, path: &str) -> Option<&serde_json::Value> {
    FieldPath::parse(path).lookup(&self.0)
  }

  pub fn into_value(self) -> serde_json::Value {
    self.0
  }
}

impl From<serde_json::Value> for Response {
  fn from(body: serde_json::Value) -> Self {
    Self(body)
  }
}

/// Executes external calls on behalf of the orchestrator.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn invoke(&self, request: &Request) -> Result<Response, TransportError>;
}
