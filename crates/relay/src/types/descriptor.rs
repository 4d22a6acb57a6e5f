//! Tool descriptors: the typed view of a tool's name, label, and parameters.
//!
//! Descriptors are what registries, the bridge, and the dispatch engine pass
//! around. On the wire they travel as [`Tool`] with a JSON Schema.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::tool::{Tool, ToolSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    pub fn from_schema_type(s: &str) -> Option<Self> {
        match s {
            "string" => Some(ParamType::String),
            "number" => Some(ParamType::Number),
            "integer" => Some(ParamType::Integer),
            "boolean" => Some(ParamType::Boolean),
            "array" => Some(ParamType::Array),
            "object" => Some(ParamType::Object),
            _ => None,
        }
    }

    /// Reads the `type` of a JSON Schema property. Nullable unions such as
    /// `["integer", "null"]` resolve to their first non-null member.
    fn from_property(property: &Value) -> Option<Self> {
        match property.get("type") {
            Some(Value::String(s)) => Self::from_schema_type(s),
            Some(Value::Array(types)) => types
                .iter()
                .filter_map(Value::as_str)
                .filter(|t| *t != "null")
                .find_map(Self::from_schema_type),
            _ => property
                .get("anyOf")
                .and_then(Value::as_array)
                .and_then(|variants| variants.iter().find_map(Self::from_property)),
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParam {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Why a set of arguments does not fit a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("arguments must be a JSON object")]
    NotAnObject,
    #[error("missing required argument '{0}'")]
    Missing(String),
    #[error("argument '{name}' must be of type {expected}")]
    WrongType { name: String, expected: ParamType },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    #[serde(default)]
    pub params: Vec<ToolParam>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: description.into(),
            params: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_param(mut self, param: ToolParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_params(mut self, params: impl IntoIterator<Item = ToolParam>) -> Self {
        self.params.extend(params);
        self
    }

    /// Human label: the title when there is one, the name otherwise.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    pub fn param(&self, name: &str) -> Option<&ToolParam> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ToolParam> {
        self.params.iter().filter(|p| p.required)
    }

    /// Check arguments against the parameter list.
    ///
    /// `null` counts as absent. Arguments not named by any parameter are
    /// tolerated.
    pub fn validate(&self, arguments: &Value) -> Result<(), SchemaViolation> {
        let empty = Map::new();
        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(SchemaViolation::NotAnObject),
        };

        for param in &self.params {
            match args.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(SchemaViolation::Missing(param.name.clone()));
                }
                None | Some(Value::Null) => {}
                Some(value) if !param.param_type.accepts(value) => {
                    return Err(SchemaViolation::WrongType {
                        name: param.name.clone(),
                        expected: param.param_type,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// How many required parameters the arguments leave unset.
    pub fn missing_required(&self, arguments: &Value) -> usize {
        self.required_params()
            .filter(|p| matches!(arguments.get(&p.name), None | Some(Value::Null)))
            .count()
    }

    pub fn to_tool(&self) -> Tool {
        let mut properties = Map::new();
        for param in &self.params {
            let mut property = json!({ "type": param.param_type.as_str() });
            if let Some(description) = &param.description {
                property["description"] = Value::String(description.clone());
            }
            properties.insert(param.name.clone(), property);
        }
        let required: Vec<String> = self.required_params().map(|p| p.name.clone()).collect();

        Tool {
            name: self.name.clone(),
            title: self.title.clone(),
            description: Some(self.description.clone()),
            input_schema: ToolSchema {
                schema_type: "object".to_string(),
                properties: Some(properties),
                required: (!required.is_empty()).then_some(required),
            },
        }
    }

    pub fn from_tool(tool: Tool) -> Self {
        let params = params_from_schema(&tool.input_schema);
        Self {
            name: tool.name,
            title: tool.title,
            description: tool.description.unwrap_or_default(),
            params,
        }
    }
}

impl From<Tool> for ToolDescriptor {
    fn from(tool: Tool) -> Self {
        ToolDescriptor::from_tool(tool)
    }
}

/// Parameters in property order. Properties without a recognizable type are
/// treated as strings.
pub fn params_from_schema(schema: &ToolSchema) -> Vec<ToolParam> {
    let Some(properties) = &schema.properties else {
        return Vec::new();
    };
    properties
        .iter()
        .map(|(name, property)| ToolParam {
            name: name.clone(),
            param_type: ParamType::from_property(property).unwrap_or(ParamType::String),
            description: property
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            required: schema.is_required(name),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forecast() -> ToolDescriptor {
        ToolDescriptor::new("query_weather_forecast", "Multi-day forecast for a city")
            .with_title("weather forecast lookup")
            .with_param(ToolParam::required("city", ParamType::String).with_description("City name"))
            .with_param(ToolParam::optional("filter_indices", ParamType::String))
    }

    #[test]
    fn test_validate_accepts_required_only() {
        assert_eq!(forecast().validate(&json!({ "city": "Beijing" })), Ok(()));
    }

    #[test]
    fn test_validate_reports_missing_and_wrong_type() {
        let descriptor = forecast();
        assert_eq!(
            descriptor.validate(&json!({})),
            Err(SchemaViolation::Missing("city".into()))
        );
        assert_eq!(
            descriptor.validate(&json!({ "city": null })),
            Err(SchemaViolation::Missing("city".into()))
        );
        assert_eq!(
            descriptor.validate(&json!({ "city": 42 })),
            Err(SchemaViolation::WrongType {
                name: "city".into(),
                expected: ParamType::String
            })
        );
        assert_eq!(
            descriptor.validate(&json!("Beijing")),
            Err(SchemaViolation::NotAnObject)
        );
    }

    #[test]
    fn test_integer_rejects_fractions() {
        let descriptor = ToolDescriptor::new("count", "")
            .with_param(ToolParam::required("n", ParamType::Integer));
        assert!(descriptor.validate(&json!({ "n": 3 })).is_ok());
        assert!(descriptor.validate(&json!({ "n": 3.5 })).is_err());
    }

    #[test]
    fn test_missing_required_count() {
        let descriptor = forecast();
        assert_eq!(descriptor.missing_required(&json!({})), 1);
        assert_eq!(descriptor.missing_required(&json!({ "city": "Shanghai" })), 0);
    }

    #[test]
    fn test_wire_form_matches_descriptor() {
        let descriptor = forecast();
        let tool = descriptor.to_tool();
        let wire = serde_json::to_value(&tool).unwrap();

        assert_eq!(wire["title"], "weather forecast lookup");
        assert_eq!(wire["inputSchema"]["properties"]["city"]["type"], "string");
        assert_eq!(wire["inputSchema"]["required"], json!(["city"]));

        let parsed: Tool = serde_json::from_value(wire).unwrap();
        assert_eq!(ToolDescriptor::from_tool(parsed), descriptor);
    }

    #[test]
    fn test_nullable_property_types() {
        let schema = ToolSchema::from_value(json!({
            "type": "object",
            "properties": {
                "days": { "type": ["integer", "null"] },
                "mode": { "anyOf": [{ "type": "null" }, { "type": "boolean" }] },
                "mystery": {}
            }
        }));
        let params = params_from_schema(&schema);
        assert_eq!(params[0].param_type, ParamType::Integer);
        assert_eq!(params[1].param_type, ParamType::Boolean);
        assert_eq!(params[2].param_type, ParamType::String);
        assert!(params.iter().all(|p| !p.required));
    }

    #[test]
    fn test_label_falls_back_to_name() {
        assert_eq!(ToolDescriptor::new("echo", "").label(), "echo");
        assert_eq!(forecast().label(), "weather forecast lookup");
    }
}
