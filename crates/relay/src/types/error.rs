//! JSON-RPC error objects.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::invocation::FailureKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorData {
    // https://www.jsonrpc.org/specification#error_object
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(Self::PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }

    /// `tools/call` named a tool the registry does not have.
    pub fn tool_not_found(name: &str) -> Self {
        Self::with_data(
            Self::METHOD_NOT_FOUND,
            format!("Tool not found: {}", name),
            json!({ "kind": FailureKind::UnknownTool }),
        )
    }

    /// `tools/call` arguments did not fit the tool's input schema.
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::with_data(
            Self::INVALID_PARAMS,
            message,
            json!({ "kind": FailureKind::SchemaMismatch }),
        )
    }

    /// Classify this error for callers of the bridge.
    ///
    /// An explicit `data.kind` wins; otherwise the code decides.
    pub fn failure_kind(&self) -> FailureKind {
        if let Some(kind) = self
            .data
            .as_ref()
            .and_then(|d| d.get("kind"))
            .and_then(Value::as_str)
            .and_then(FailureKind::parse)
        {
            return kind;
        }
        match self.code {
            Self::METHOD_NOT_FOUND => FailureKind::UnknownTool,
            Self::INVALID_PARAMS => FailureKind::SchemaMismatch,
            _ => FailureKind::Internal,
        }
    }
}

impl std::fmt::Display for ErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorData {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let error = ErrorData::method_not_found("foo/bar");
        let json = serde_json::to_value(&error).unwrap();

        assert_eq!(json["code"], -32601);
        assert_eq!(json["message"], "Method not found: foo/bar");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_tool_errors_carry_kind() {
        let unknown = serde_json::to_value(ErrorData::tool_not_found("nope")).unwrap();
        assert_eq!(unknown["code"], -32601);
        assert_eq!(unknown["data"]["kind"], "unknown_tool");

        let mismatch = serde_json::to_value(ErrorData::schema_mismatch("city is required")).unwrap();
        assert_eq!(mismatch["code"], -32602);
        assert_eq!(mismatch["data"]["kind"], "schema_mismatch");
    }

    #[test]
    fn test_failure_kind_classification() {
        assert_eq!(ErrorData::tool_not_found("x").failure_kind(), FailureKind::UnknownTool);
        assert_eq!(
            ErrorData::invalid_params("bad").failure_kind(),
            FailureKind::SchemaMismatch
        );
        assert_eq!(ErrorData::internal_error("boom").failure_kind(), FailureKind::Internal);
        assert_eq!(
            ErrorData::with_data(-32000, "upstream", json!({ "kind": "upstream_error" }))
                .failure_kind(),
            FailureKind::UpstreamError
        );
    }
}
