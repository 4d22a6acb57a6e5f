//! HTTP transport for the remote tool protocol.
//!
//! - `GET /sse` opens the server→client event stream
//! - `POST /message?sessionId=…` carries client→server JSON-RPC; answered
//!   with `202 Accepted`, the response arrives on the event stream

pub mod frame;
mod message;
mod sse;

pub use frame::{SseDecoder, SseEvent};
pub use message::message_handler;
pub use sse::sse_handler;

use axum::Router;
use std::sync::Arc;

use crate::registry::ToolRegistry;
use crate::session::{InMemorySessionStore, SessionStore};
use crate::types::protocol::Implementation;
use crate::types::tool::Tool;

/// Shared state for the transport handlers.
pub struct RelayState {
    pub registry: Arc<ToolRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    pub server_info: Implementation,
    pub instructions: Option<String>,
    /// Path advertised in the `endpoint` event, relative to where the router
    /// is mounted.
    pub message_path: String,
}

impl RelayState {
    pub fn new(registry: ToolRegistry, server_info: Implementation) -> Self {
        Self {
            registry: Arc::new(registry),
            sessions: Arc::new(InMemorySessionStore::new()),
            server_info,
            instructions: None,
            message_path: "/message".to_string(),
        }
    }

    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_message_path(mut self, path: impl Into<String>) -> Self {
        self.message_path = path.into();
        self
    }

    /// Registry contents in wire form.
    pub fn tool_listing(&self) -> Vec<Tool> {
        self.registry.list().iter().map(|d| d.to_tool()).collect()
    }
}

/// Routes:
/// - GET /sse
/// - POST /message
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/sse", axum::routing::get(sse_handler))
        .route("/message", axum::routing::post(message_handler))
        .with_state(state)
}
