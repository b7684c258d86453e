//! Explicit coercion of loosely typed tool arguments.

use serde_json::{Map, Value};

use crate::errors::McpError;

pub type Arguments = Map<String, Value>;

pub fn required_string(args: &Arguments, key: &str) -> Result<String, McpError> {
    match args.get(key) {
        None | Some(Value::Null) => Err(McpError::invalid_params(format!(
            "missing required field '{key}'"
        ))),
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.clone()),
        Some(Value::String(_)) => Err(McpError::invalid_params(format!(
            "'{key}' must not be empty"
        ))),
        Some(_) => Err(McpError::invalid_params(format!("'{key}' must be a string"))),
    }
}

/// Like [`required_string`] but an empty string is a legal value.
pub fn required_string_allow_empty(args: &Arguments, key: &str) -> Result<String, McpError> {
    match args.get(key) {
        None | Some(Value::Null) => Err(McpError::invalid_params(format!(
            "missing required field '{key}'"
        ))),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(McpError::invalid_params(format!("'{key}' must be a string"))),
    }
}

/// Absent and `null` are `None`; an empty string is kept so callers can
/// treat it as "clear".
pub fn optional_string(args: &Arguments, key: &str) -> Result<Option<String>, McpError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(McpError::invalid_params(format!("'{key}' must be a string"))),
    }
}

fn integral(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(integer) = number.as_i64() {
        return Some(integer);
    }
    let float = number.as_f64()?;
    (float.is_finite() && float.fract() == 0.0 && float.abs() < i64::MAX as f64)
        .then_some(float as i64)
}

pub fn required_integer(args: &Arguments, key: &str) -> Result<i64, McpError> {
    optional_integer(args, key)?
        .ok_or_else(|| McpError::invalid_params(format!("missing required field '{key}'")))
}

pub fn optional_integer(args: &Arguments, key: &str) -> Result<Option<i64>, McpError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => integral(value)
            .map(Some)
            .ok_or_else(|| McpError::invalid_params(format!("'{key}' must be an integer"))),
    }
}

pub fn optional_count(args: &Arguments, key: &str) -> Result<Option<u32>, McpError> {
    optional_integer(args, key)?
        .map(|value| {
            u32::try_from(value).map_err(|_| {
                McpError::invalid_params(format!("'{key}' must be a non-negative integer"))
            })
        })
        .transpose()
}

pub fn optional_string_list(args: &Arguments, key: &str) -> Result<Vec<String>, McpError> {
    let invalid = || McpError::invalid_params(format!("'{key}' must be an array of strings"));
    match args.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        Some(_) => Err(invalid()),
    }
}
