use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::error::TransportError;
use crate::retry::RetryPolicy;
use crate::transport::{Request, Response, Transport};

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
  /// Base URL; each action is posted to `{endpoint}/{action}`.
  pub endpoint: String,
  /// Per-request timeout.
  pub timeout_ms: u64,
  pub retry: RetryPolicy,
  /// Extra headers sent with every request (auth tokens, tenant ids).
  pub headers: HashMap<String, String>,
}

impl HttpTransportConfig {
  pub fn new(endpoint: impl Into<String>) -> Self {
    Self {
      endpoint: endpoint.into(),
      timeout_ms: 30_000,
      retry: RetryPolicy::default(),
      headers: HashMap::new(),
    }
  }
}

/// JSON-over-HTTP transport.
///
/// Success is any 2xx status; the body (empty means `{}`) becomes the
/// response. Other statuses become a [`TransportError`] whose code comes from
/// the body's `code` or `__type` field when present. 5xx, 429, timeouts and
/// connection failures are retried per the configured [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: Client,
  endpoint: Url,
  config: HttpTransportConfig,
}

impl HttpTransport {
  pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
    let mut endpoint = Url::parse(&config.endpoint).map_err(|e| {
      TransportError::new(
        "InvalidEndpoint",
        format!("invalid endpoint '{}': {}", config.endpoint, e),
      )
    })?;
    // Normalized so action_url can replace the trailing empty segment
    if !endpoint.path().ends_with('/') {
      let path = format!("{}/", endpoint.path());
      endpoint.set_path(&path);
    }

    let client = Client::builder()
      .timeout(Duration::from_millis(config.timeout_ms))
      .build()?;

    Ok(Self {
      client,
      endpoint,
      config,
    })
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }

  /// The action is appended as one encoded path segment, so it can never
  /// leave the endpoint.
  fn action_url(&self, action: &str) -> Result<Url, TransportError> {
    if action.is_empty() {
      return Err(TransportError::new("InvalidAction", "action is empty"));
    }
    let mut url = self.endpoint.clone();
    url
      .path_segments_mut()
      .map_err(|_| {
        TransportError::new(
          "InvalidEndpoint",
          format!("endpoint '{}' cannot take a path", self.endpoint),
        )
      })?
      .pop_if_empty()
      .push(action);
    Ok(url)
  }

  async fn send_once(&self, url: &Url, request: &Request) -> Result<Response, TransportError> {
    let mut builder = self.client.post(url.clone()).json(request);
    for (key, value) in &self.config.headers {
      builder = builder.header(key, value);
    }

    let response = builder.send().await?;
    let status = response.status();
    let text = response.text().await?;

    if status.is_success() {
      if text.trim().is_empty() {
        return Ok(Response::new(serde_json::json!({})));
      }
      let body = serde_json::from_str(&text).map_err(|e| {
        TransportError::new("InvalidResponse", format!("response is not JSON: {}", e))
      })?;
      return Ok(Response::new(body));
    }

    Err(error_from_body(status, &text))
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn invoke(&self, request: &Request) -> Result<Response, TransportError> {
    let url = self.action_url(&request.action)?;
    let policy = &self.config.retry;
    let mut attempt = 1;

    loop {
      debug!(action = %request.action, attempt, url = %url, "sending request");

      match self.send_once(&url, request).await {
        Ok(response) => return Ok(response),
        Err(e) if e.retryable && policy.should_retry(attempt) => {
          let delay = policy.delay_for(attempt);
          warn!(
            action = %request.action,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "retrying request"
          );
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }
}

fn error_from_body(status: StatusCode, text: &str) -> TransportError {
  let body: Option<serde_json::Value> = serde_json::from_str(text).ok();
  let field = |name: &str| {
    body
      .as_ref()
      .and_then(|b| b.get(name))
      .and_then(|v| v.as_str())
      .map(str::to_string)
  };

  let code = field("code")
    .or_else(|| field("__type"))
    .unwrap_or_else(|| format!("Http{}", status.as_u16()));
  let message = field("message")
    .or_else(|| field("Message"))
    .unwrap_or_else(|| {
      if text.is_empty() {
        status.to_string()
      } else {
        text.to_string()
      }
    });

  let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
  TransportError::new(code, message).retryable(retryable)
}
