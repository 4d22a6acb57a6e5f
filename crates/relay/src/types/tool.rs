//! Tool wire types: the `Tool` listing entry and `tools/call` payloads.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::content::Content;
use super::invocation::{FailureKind, ToolInvocationResult};

/// A tool as it appears in `tools/list` and the handshake listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub input_schema: ToolSchema,
}

/// JSON Schema for tool input. Property order is preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub schema_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl ToolSchema {
    pub fn empty() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: None,
            required: None,
        }
    }

    /// Lenient parse of an arbitrary schema value. Anything that is not an
    /// object schema becomes the empty schema.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self::empty();
        };
        let properties = match map.remove("properties") {
            Some(Value::Object(props)) => Some(props),
            _ => None,
        };
        let required = match map.remove("required") {
            Some(Value::Array(names)) => Some(
                names
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        };
        Self {
            schema_type: map
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("object")
                .to_string(),
            properties,
            required,
        }
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required
            .as_ref()
            .is_some_and(|names| names.iter().any(|n| n == name))
    }
}

impl Default for ToolSchema {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<Content>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    /// Wire form of a registry outcome.
    ///
    /// Success carries the payload twice: as text JSON for clients that only
    /// read content blocks, and as `structuredContent`. Failures carry
    /// `{kind, message}` so the far side can rebuild the classification.
    pub fn from_invocation(result: ToolInvocationResult) -> Self {
        match result {
            ToolInvocationResult::Success { payload } => {
                let text = match &payload {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Self {
                    content: vec![Content::text(text)],
                    is_error: false,
                    structured_content: Some(payload),
                }
            }
            ToolInvocationResult::Failure { kind, message } => Self {
                content: vec![Content::text(message.clone())],
                is_error: true,
                structured_content: Some(json!({ "kind": kind, "message": message })),
            },
        }
    }

    /// Rebuild the outcome on the client side.
    pub fn into_invocation(self) -> ToolInvocationResult {
        let first_text = self
            .content
            .first()
            .map(|block| block.as_text().to_string());

        if self.is_error {
            let structured = self.structured_content.as_ref();
            let kind = structured
                .and_then(|s| s.get("kind"))
                .and_then(Value::as_str)
                .and_then(FailureKind::parse)
                .unwrap_or(FailureKind::UpstreamError);
            let message = structured
                .and_then(|s| s.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or(first_text)
                .unwrap_or_else(|| "tool reported an error".to_string());
            return ToolInvocationResult::failure(kind, message);
        }

        if let Some(payload) = self.structured_content {
            return ToolInvocationResult::success(payload);
        }

        // Servers that only send text: JSON if it parses, the raw string otherwise.
        let payload = match first_text {
            Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            None => Value::Null,
        };
        ToolInvocationResult::success(payload)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl ListToolsResult {
    pub fn all(tools: Vec<Tool>) -> Self {
        Self {
            tools,
            next_cursor: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_schema_keeps_property_order() {
        let schema = ToolSchema::from_value(json!({
            "type": "object",
            "properties": {
                "zeta": { "type": "string" },
                "alpha": { "type": "integer" }
            },
            "required": ["zeta"]
        }));

        let names: Vec<_> = schema.properties.as_ref().unwrap().keys().cloned().collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert!(schema.is_required("zeta"));
        assert!(!schema.is_required("alpha"));
    }

    #[test]
    fn test_success_wire_form() {
        let result = CallToolResult::from_invocation(ToolInvocationResult::success(
            json!({ "temperature": "21" }),
        ));
        let wire = serde_json::to_value(&result).unwrap();
        assert!(wire.get("isError").is_none());
        assert_eq!(wire["structuredContent"]["temperature"], "21");
        assert_eq!(wire["content"][0]["text"], "{\"temperature\":\"21\"}");
    }

    #[test]
    fn test_failure_survives_the_wire() {
        let original = ToolInvocationResult::failure(FailureKind::UpstreamError, "amap said no");
        let wire = serde_json::to_value(CallToolResult::from_invocation(original.clone())).unwrap();
        assert_eq!(wire["isError"], true);
        assert_eq!(wire["structuredContent"]["kind"], "upstream_error");

        let parsed: CallToolResult = serde_json::from_value(wire).unwrap();
        assert_eq!(parsed.into_invocation(), original);
    }

    #[test]
    fn test_text_only_results() {
        let json_text = CallToolResult {
            content: vec![Content::text("{\"a\":1}")],
            is_error: false,
            structured_content: None,
        };
        assert_eq!(json_text.into_invocation().payload(), Some(&json!({ "a": 1 })));

        let plain = CallToolResult {
            content: vec![Content::text("sunny")],
            is_error: false,
            structured_content: None,
        };
        assert_eq!(plain.into_invocation().payload(), Some(&json!("sunny")));

        let bare_error = CallToolResult {
            content: vec![Content::text("broke")],
            is_error: true,
            structured_content: None,
        };
        assert_eq!(
            bare_error.into_invocation(),
            ToolInvocationResult::failure(FailureKind::UpstreamError, "broke")
        );
    }
}
