//! Validate call arguments against an action's JSON Schema before execution.

use serde_json::Value;

use crate::error::{ForemanError, Result};

/// Validate arguments against a top-level JSON Schema.
///
/// Checks the object type, required fields, declared property types, string
/// enums and `additionalProperties: false`. Reports the first violation.
pub fn validate_arguments(action_name: &str, args: &Value, schema: &Value) -> Result<()> {
    check(args, schema).map_err(|reason| {
        ForemanError::InvalidArgument(format!("{action_name}: {reason}"))
    })
}

fn check(args: &Value, schema: &Value) -> std::result::Result<(), String> {
    let expects_object = schema.get("type").and_then(Value::as_str) == Some("object");
    let Some(obj) = args.as_object() else {
        if expects_object && !args.is_null() {
            return Err(format!("expected object arguments, got {}", json_type_name(args)));
        }
        // `null` stands for "no arguments"; only required fields can fail it.
        return match first_required(schema) {
            Some(name) if expects_object => Err(format!("missing required field '{name}'")),
            _ => Ok(()),
        };
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        if let Some(missing) = required
            .iter()
            .filter_map(Value::as_str)
            .find(|name| !obj.contains_key(*name))
        {
            return Err(format!("missing required field '{missing}'"));
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in obj {
        let Some(prop) = properties.and_then(|props| props.get(key)) else {
            if closed {
                return Err(format!("unexpected field '{key}'"));
            }
            continue;
        };
        if let Some(expected) = prop.get("type").and_then(Value::as_str) {
            if !value_matches_type(value, expected) {
                return Err(format!(
                    "field '{key}' expected type '{expected}', got {}",
                    json_type_name(value)
                ));
            }
        }
        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(format!(
                    "field '{key}' must be one of {}",
                    Value::Array(allowed.clone())
                ));
            }
        }
    }

    Ok(())
}

fn first_required(schema: &Value) -> Option<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .and_then(|required| required.iter().find_map(Value::as_str))
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
