//! Typed access to tool call input.

use crate::error::RociError;

/// Parse the raw input text of a tool call.
///
/// Models frequently send an empty string for tools without parameters, so
/// blank input parses as `{}`.
pub fn parse_tool_input(raw: &str) -> Result<serde_json::Value, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(trimmed)
}

/// Parsed tool input with typed getters.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    fn missing(kind: &str, key: &str) -> RociError {
        RociError::InvalidArgument(format!("Missing {kind} argument: {key}"))
    }

    pub fn get_str(&self, key: &str) -> Result<&str, RociError> {
        self.get_str_opt(key).ok_or_else(|| Self::missing("string", key))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, RociError> {
        self.value
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| Self::missing("integer", key))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, RociError> {
        self.value
            .get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| Self::missing("number", key))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, RociError> {
        self.value
            .get(key)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| Self::missing("boolean", key))
    }

    pub fn get_array(&self, key: &str) -> Result<&Vec<serde_json::Value>, RociError> {
        self.value
            .get(key)
            .and_then(|v| v.as_array())
            .ok_or_else(|| Self::missing("array", key))
    }

    /// Deserialize the whole input into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, RociError> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            RociError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}
