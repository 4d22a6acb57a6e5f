//! Tool parameter lists derived from typed argument structs.
//!
//! Subschemas are inlined so the generated `inputSchema` never contains
//! `$defs`/`$ref`, which LLM function-calling front ends handle poorly.

use schemars::JsonSchema;
use serde_json::Value;

use crate::types::descriptor::{params_from_schema, ToolParam};
use crate::types::tool::ToolSchema;

/// Draft-07 JSON Schema for `T`.
pub fn schema_for<T: JsonSchema>() -> Value {
    let settings = schemars::generate::SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
    });
    let generator = settings.into_generator();
    let schema = generator.into_root_schema_for::<T>();
    serde_json::to_value(&schema).unwrap_or_default()
}

/// Parameters of `T` in field order. `Option` fields come out optional.
pub fn params_for<T: JsonSchema>() -> Vec<ToolParam> {
    params_from_schema(&ToolSchema::from_value(schema_for::<T>()))
}
