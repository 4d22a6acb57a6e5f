//! Argument clean-up applied before validation.
//!
//! Models often quote numbers, spell booleans as strings, or send `null` for
//! optional parameters they have nothing to say about. Those are repaired
//! here; anything else is left for validation to reject.

use relay::{ParamType, ToolDescriptor};
use serde_json::{Map, Number, Value};

/// `null` becomes an empty object. Non-objects are returned untouched.
pub fn normalize_arguments(descriptor: &ToolDescriptor, arguments: Value) -> Value {
    let mut args = match arguments {
        Value::Null => return Value::Object(Map::new()),
        Value::Object(map) => map,
        other => return other,
    };

    for param in &descriptor.params {
        let Some(value) = args.get_mut(&param.name) else {
            continue;
        };
        if value.is_null() {
            if !param.required {
                args.remove(&param.name);
            }
            continue;
        }
        if let Some(coerced) = coerce(param.param_type, value) {
            *value = coerced;
        }
    }

    Value::Object(args)
}

fn coerce(expected: ParamType, value: &Value) -> Option<Value> {
    let Value::String(text) = value else {
        return None;
    };
    let text = text.trim();
    match expected {
        ParamType::Integer => text.parse::<i64>().ok().map(Value::from),
        ParamType::Number => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        ParamType::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}
