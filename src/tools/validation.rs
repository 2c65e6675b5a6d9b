//! Check parsed tool input against the tool's own parameter schema.
//!
//! This is a shallow structural check, not a JSON Schema implementation: the
//! top-level type, required keys, property types, string enums and the type of
//! array items. Only the schema the tool declares is consulted.

use serde_json::Value;

use crate::error::RociError;

/// Validate `input` for `tool_name` against `schema`.
pub fn validate_input(tool_name: &str, input: &Value, schema: &Value) -> Result<(), RociError> {
    check(input, schema).map_err(|message| RociError::InvalidToolInput {
        tool_name: tool_name.to_string(),
        message,
    })
}

fn check(input: &Value, schema: &Value) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if expected == "object" && !input.is_object() {
            return Err(format!("expected object input, got {}", json_type_name(input)));
        }
    }

    let Some(obj) = input.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        if let Some(name) = required
            .iter()
            .filter_map(Value::as_str)
            .find(|name| !obj.contains_key(*name))
        {
            return Err(format!("missing required field '{name}'"));
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in obj {
        let Some(prop) = properties.get(key) else {
            continue;
        };
        check_property(key, value, prop)?;
    }

    Ok(())
}

fn check_property(key: &str, value: &Value, prop: &Value) -> Result<(), String> {
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
            return Err(format!("field '{key}' must be one of {}", Value::Array(allowed.clone())));
        }
    }

    if let (Some(items), Some(item_type)) = (
        value.as_array(),
        prop.get("items")
            .and_then(|i| i.get("type"))
            .and_then(Value::as_str),
    ) {
        if let Some((index, item)) = items
            .iter()
            .enumerate()
            .find(|(_, item)| !value_matches_type(item, item_type))
        {
            return Err(format!(
                "field '{key}[{index}]' expected type '{item_type}', got {}",
                json_type_name(item)
            ));
        }
    }

    Ok(())
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
