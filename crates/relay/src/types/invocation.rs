//! Invocation outcomes shared by the registry, the server, the client bridge,
//! and whatever sits on top of them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::jsonrpc::JsonRpcRequest;

/// Why a tool invocation did not produce a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No connection could be established (or waited for) in time.
    ConnectionUnavailable,
    /// The connection dropped while the request was outstanding.
    ConnectionLost,
    /// The result did not arrive before the caller's deadline.
    Timeout,
    UnknownTool,
    SchemaMismatch,
    /// The tool ran but its upstream dependency failed.
    UpstreamError,
    OracleError,
    /// The handler panicked or failed without a classification.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ConnectionUnavailable => "connection_unavailable",
            FailureKind::ConnectionLost => "connection_lost",
            FailureKind::Timeout => "timeout",
            FailureKind::UnknownTool => "unknown_tool",
            FailureKind::SchemaMismatch => "schema_mismatch",
            FailureKind::UpstreamError => "upstream_error",
            FailureKind::OracleError => "oracle_error",
            FailureKind::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(Value::String(s.to_string())).ok()
    }

    /// Failures caused by the link to a remote service rather than the tool.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FailureKind::ConnectionUnavailable | FailureKind::ConnectionLost | FailureKind::Timeout
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly one of these resolves every invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolInvocationResult {
    Success { payload: Value },
    Failure { kind: FailureKind, message: String },
}

impl ToolInvocationResult {
    pub fn success(payload: Value) -> Self {
        ToolInvocationResult::Success { payload }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        ToolInvocationResult::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolInvocationResult::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ToolInvocationResult::Success { .. } => None,
            ToolInvocationResult::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            ToolInvocationResult::Success { payload } => Some(payload),
            ToolInvocationResult::Failure { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<Value, ToolError> {
        match self {
            ToolInvocationResult::Success { payload } => Ok(payload),
            ToolInvocationResult::Failure { kind, message } => Err(ToolError { kind, message }),
        }
    }
}

/// A classified failure raised by a tool implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: FailureKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(FailureKind::UpstreamError, message)
    }

    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::new(FailureKind::SchemaMismatch, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}

impl From<ToolError> for ToolInvocationResult {
    fn from(err: ToolError) -> Self {
        ToolInvocationResult::Failure {
            kind: err.kind,
            message: err.message,
        }
    }
}

impl From<Result<Value, ToolError>> for ToolInvocationResult {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(payload) => ToolInvocationResult::Success { payload },
            Err(err) => err.into(),
        }
    }
}

/// One call attempt. The correlation id is the JSON-RPC request id.
#[derive(Debug, Clone)]
pub struct ToolInvocationRequest {
    pub id: u64,
    pub name: String,
    pub arguments: Value,
}

impl ToolInvocationRequest {
    pub fn new(id: u64, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id,
            name: name.into(),
            arguments,
        }
    }

    pub fn to_jsonrpc(&self) -> JsonRpcRequest {
        JsonRpcRequest::with_params(
            self.id,
            "tools/call",
            serde_json::json!({
                "name": self.name,
                "arguments": self.arguments,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_kind_snake_case() {
        let json = serde_json::to_value(FailureKind::ConnectionUnavailable).unwrap();
        assert_eq!(json, "connection_unavailable");
        assert_eq!(FailureKind::parse("schema_mismatch"), Some(FailureKind::SchemaMismatch));
        assert_eq!(FailureKind::parse("exploded"), None);
        assert_eq!(FailureKind::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_result_tagging() {
        let ok = serde_json::to_value(ToolInvocationResult::success(json!({ "a": 1 }))).unwrap();
        assert_eq!(ok["status"], "success");
        assert_eq!(ok["payload"]["a"], 1);

        let failed = serde_json::to_value(ToolInvocationResult::failure(
            FailureKind::Timeout,
            "too slow",
        ))
        .unwrap();
        assert_eq!(failed["status"], "failure");
        assert_eq!(failed["kind"], "timeout");
    }

    #[test]
    fn test_tool_error_converts() {
        let result: ToolInvocationResult = ToolError::upstream("503 from provider").into();
        assert_eq!(result.failure_kind(), Some(FailureKind::UpstreamError));
        assert!(!result.is_success());
    }

    #[test]
    fn test_invocation_request_wire_form() {
        let request = ToolInvocationRequest::new(12, "echo", json!({ "text": "hi" }));
        let wire = serde_json::to_value(request.to_jsonrpc()).unwrap();
        assert_eq!(wire["id"], 12);
        assert_eq!(wire["method"], "tools/call");
        assert_eq!(wire["params"]["name"], "echo");
        assert_eq!(wire["params"]["arguments"]["text"], "hi");
    }
}
