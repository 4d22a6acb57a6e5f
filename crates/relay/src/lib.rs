//! relay - tools over a remote procedure protocol carried on Server-Sent Events.
//!
//! # Pieces
//!
//! - **Registry**: named tools with typed parameter descriptors and async handlers
//! - **Server**: an axum router exposing a registry at `GET /sse` + `POST /message`
//! - **Client**: a reconnecting bridge that calls remote tools (enable `client` feature)
//!
//! Every invocation, local or remote, resolves to a [`ToolInvocationResult`]:
//! a success payload or a failure with a [`FailureKind`].
//!
//! # Server Example
//!
//! ```rust,ignore
//! use relay::{handler_fn, Implementation, ParamType, RelayState, ToolDescriptor, ToolParam, ToolRegistry};
//!
//! let registry = ToolRegistry::builder()
//!     .tool(
//!         ToolDescriptor::new("echo", "Echo the text back")
//!             .with_param(ToolParam::required("text", ParamType::String)),
//!         handler_fn(|args| async move { Ok(args) }),
//!     )
//!     .build()?;
//!
//! let state = std::sync::Arc::new(RelayState::new(registry, Implementation::new("echo", "0.1.0")));
//! let app = relay::router(state);
//! ```
//!
//! # Client Example (requires `client` feature)
//!
//! ```rust,ignore
//! use relay::client::{ClientOptions, SseClient};
//!
//! let client = SseClient::new("http://localhost:8001", ClientOptions::default());
//! let result = client.call_tool("echo", json!({ "text": "hi" }), Duration::from_secs(5)).await;
//! ```

pub mod protocol;
pub mod registry;
pub mod schema_helpers;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(feature = "client")]
pub mod client;

pub use types::content::Content;
pub use types::descriptor::{ParamType, SchemaViolation, ToolDescriptor, ToolParam};
pub use types::error::ErrorData;
pub use types::invocation::{FailureKind, ToolError, ToolInvocationRequest, ToolInvocationResult};
pub use types::jsonrpc::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use types::protocol::{Implementation, ServerCapabilities};
pub use types::tool::{CallToolResult, Tool, ToolSchema};

pub use registry::{handler_fn, typed, RegistryError, ToolHandler, ToolRegistry};

pub use session::{spawn_cleanup_task, ConnectionPhase, InMemorySessionStore, Session, SessionStats, SessionStore};

pub use transport::{router, RelayState};

pub use schema_helpers::{params_for, schema_for};
