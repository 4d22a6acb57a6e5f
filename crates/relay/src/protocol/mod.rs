//! JSON-RPC method dispatch for the tool server.
//!
//! Spans follow the OpenTelemetry JSON-RPC semantic conventions.
//! See: https://opentelemetry.io/docs/specs/semconv/rpc/json-rpc/

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::session::ConnectionPhase;
use crate::transport::RelayState;
use crate::types::error::ErrorData;
use crate::types::invocation::{FailureKind, ToolInvocationResult};
use crate::types::jsonrpc::JsonRpcMessage;
use crate::types::protocol::{InitializeParams, InitializeResult, ServerCapabilities};
use crate::types::tool::{CallToolParams, CallToolResult, ListToolsResult};

/// Dispatch one message under a span. `parent` is the caller's propagated
/// trace context, when the request carried one.
pub async fn dispatch(
    state: &Arc<RelayState>,
    session_id: &str,
    message: &JsonRpcMessage,
    parent: Option<opentelemetry::Context>,
) -> Result<Value, ErrorData> {
    let request_id = message
        .id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_default();

    let span = tracing::info_span!(
        "relay.dispatch",
        rpc.system = "jsonrpc",
        rpc.method = %message.method,
        rpc.jsonrpc.version = "2.0",
        rpc.jsonrpc.request_id = %request_id,
        relay.session_id = %session_id,
        error.type = tracing::field::Empty,
        rpc.jsonrpc.error_code = tracing::field::Empty,
        rpc.jsonrpc.error_message = tracing::field::Empty,
    );
    if let Some(parent) = parent {
        span.set_parent(parent);
    }

    async {
        let result = dispatch_inner(state, session_id, message).await;
        if let Err(ref error) = result {
            record_error_on_span(error);
        }
        result
    }
    .instrument(span)
    .await
}

fn record_error_on_span(error: &ErrorData) {
    let span = tracing::Span::current();
    span.record("error.type", error_type_for_code(error.code));
    span.record("rpc.jsonrpc.error_code", error.code);
    span.record("rpc.jsonrpc.error_message", error.message.as_str());
}

fn error_type_for_code(code: i32) -> &'static str {
    match code {
        ErrorData::PARSE_ERROR => "parse_error",
        ErrorData::INVALID_REQUEST => "invalid_request",
        ErrorData::METHOD_NOT_FOUND => "method_not_found",
        ErrorData::INVALID_PARAMS => "invalid_params",
        ErrorData::INTERNAL_ERROR => "internal_error",
        _ => "application_error",
    }
}

async fn dispatch_inner(
    state: &Arc<RelayState>,
    session_id: &str,
    message: &JsonRpcMessage,
) -> Result<Value, ErrorData> {
    match message.method.as_str() {
        "initialize" => handle_initialize(state, session_id, message),
        "notifications/initialized" => Ok(Value::Null),
        "ping" => Ok(serde_json::json!({})),

        "tools/list" | "tools/call" if !is_serving(state, session_id) => Err(
            ErrorData::invalid_request("session is not initialized; send initialize first"),
        ),
        "tools/list" => handle_list_tools(state),
        "tools/call" => handle_call_tool(state, session_id, message).await,

        _ => Err(ErrorData::method_not_found(&message.method)),
    }
}

fn is_serving(state: &RelayState, session_id: &str) -> bool {
    state.sessions.phase(session_id) == Some(ConnectionPhase::Serving)
}

fn parse_params<T: DeserializeOwned>(message: &JsonRpcMessage, what: &str) -> Result<T, ErrorData> {
    message
        .params
        .as_ref()
        .map(|p| serde_json::from_value(p.clone()))
        .transpose()
        .map_err(|e| ErrorData::invalid_params(format!("Invalid {} params: {}", what, e)))?
        .ok_or_else(|| ErrorData::invalid_params(format!("Missing {} params", what)))
}

fn to_value<T: serde::Serialize>(result: &T) -> Result<Value, ErrorData> {
    serde_json::to_value(result)
        .map_err(|e| ErrorData::internal_error(format!("Failed to serialize result: {}", e)))
}

fn handle_initialize(
    state: &Arc<RelayState>,
    session_id: &str,
    message: &JsonRpcMessage,
) -> Result<Value, ErrorData> {
    let params: InitializeParams = parse_params(message, "initialize")?;

    state.sessions.set_serving(session_id, params.client_info);

    let mut result = InitializeResult::new(state.server_info.clone(), ServerCapabilities::with_tools());
    if let Some(instructions) = &state.instructions {
        result = result.with_instructions(instructions.clone());
    }
    to_value(&result)
}

fn handle_list_tools(state: &Arc<RelayState>) -> Result<Value, ErrorData> {
    to_value(&ListToolsResult::all(state.tool_listing()))
}

async fn handle_call_tool(
    state: &Arc<RelayState>,
    session_id: &str,
    message: &JsonRpcMessage,
) -> Result<Value, ErrorData> {
    let params: CallToolParams = parse_params(message, "call")?;
    let arguments = Value::Object(params.arguments.unwrap_or_default());

    let tool_span = tracing::info_span!(
        "relay.tool.call",
        relay.tool.name = %params.name,
        relay.session_id = %session_id,
        relay.tool.outcome = tracing::field::Empty,
    );

    async {
        let result = state.registry.invoke(&params.name, arguments).await;
        let outcome = result.failure_kind().map(|k| k.as_str()).unwrap_or("success");
        tracing::Span::current().record("relay.tool.outcome", outcome);

        match result {
            ToolInvocationResult::Failure {
                kind: FailureKind::UnknownTool,
                ..
            } => Err(ErrorData::tool_not_found(&params.name)),
            ToolInvocationResult::Failure {
                kind: FailureKind::SchemaMismatch,
                message,
            } => Err(ErrorData::schema_mismatch(message)),
            other => to_value(&CallToolResult::from_invocation(other)),
        }
    }
    .instrument(tool_span)
    .await
}
