//! Dialtone Transport
//!
//! The seam between the orchestrator and the management API it drives. The
//! orchestrator only ever sees [`Transport::invoke`]: an action name, resolved
//! parameters and an idempotency key go in, a structured response or a
//! [`TransportError`] comes out.
//!
//! [`HttpTransport`] is the production implementation. It POSTs each call as
//! JSON to `{endpoint}/{action}` and retries transient failures according to
//! a [`RetryPolicy`]. Tests implement [`Transport`] directly.

mod error;
mod http;
mod retry;
mod transport;

pub use error::TransportError;
pub use http::{HttpTransport, HttpTransportConfig};
pub use retry::RetryPolicy;
pub use transport::{Request, Response, Transport};
