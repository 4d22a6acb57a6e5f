//! Client side of the remote tool protocol.
//!
//! [`SseClient`] is one logical connection to one remote tool service. It
//! connects lazily, multiplexes concurrent calls over a single event stream,
//! and reconnects with backoff when the stream drops. [`ClientPool`] spreads
//! calls over several such connections.
//!
//! ```rust,ignore
//! use relay::client::{ClientOptions, RemoteTools, SseClient};
//!
//! let client = SseClient::new("http://localhost:8001", ClientOptions::default());
//! let tools = client.list_tools().await?;
//! let result = client
//!     .call_tool("query_current_weather", json!({ "city": "Beijing" }), Duration::from_secs(10))
//!     .await;
//! ```

mod pool;
mod sse;

pub use pool::ClientPool;
pub use sse::SseClient;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::types::descriptor::ToolDescriptor;
use crate::types::invocation::{FailureKind, ToolInvocationResult};

/// What the dispatch layer needs from a remote tool service.
#[async_trait]
pub trait RemoteTools: Send + Sync {
    /// Base URL of the service, for logs and diagnostics.
    fn endpoint(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError>;

    /// Always resolves; transport problems come back as `Failure` results.
    async fn call_tool(&self, name: &str, arguments: Value, timeout: Duration) -> ToolInvocationResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Ready,
    /// The stream dropped and reconnection is in progress.
    Degraded,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub client_name: String,
    pub client_version: String,
    /// Bound on establishing a connection, handshake included.
    pub connect_timeout: Duration,
    /// Bound on `tools/list`.
    pub request_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Callers allowed to wait for a connection at once.
    pub max_queued_calls: usize,
    /// How long a caller waits for a degraded connection to recover.
    pub max_queue_wait: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_name: "relay-client".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            max_queued_calls: 64,
            max_queue_wait: Duration::from_secs(10),
        }
    }
}

impl ClientOptions {
    pub fn with_name(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            client_name: name.into(),
            client_version: version.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Connection unavailable: {0}")]
    Unavailable(String),

    #[error("Connection lost while waiting for a response")]
    ConnectionLost,

    #[error("Remote error [{code}]: {message}")]
    Rpc { code: i32, message: String },
}

impl ClientError {
    /// How a failed call surfaces to callers of `call_tool`.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ClientError::Transport(_) | ClientError::Http { .. } | ClientError::ConnectionLost => {
                FailureKind::ConnectionLost
            }
            ClientError::Timeout(_) => FailureKind::Timeout,
            ClientError::Unavailable(_) => FailureKind::ConnectionUnavailable,
            ClientError::Protocol(_) | ClientError::Rpc { .. } => FailureKind::Internal,
        }
    }
}

impl From<crate::types::error::ErrorData> for ClientError {
    fn from(error: crate::types::error::ErrorData) -> Self {
        ClientError::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

/// W3C `traceparent` for the current span, when it is being traced.
pub(crate) fn current_traceparent() -> Option<String> {
    use opentelemetry::trace::TraceContextExt;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let span = tracing::Span::current();
    let context = span.context();
    let ctx_span = context.span();
    let span_context = ctx_span.span_context();

    if !span_context.is_valid() {
        return None;
    }
    let flags = if span_context.is_sampled() { "01" } else { "00" };
    Some(format!(
        "00-{}-{}-{}",
        span_context.trace_id(),
        span_context.span_id(),
        flags
    ))
}
