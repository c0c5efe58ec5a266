//! Input validation applied before any record reaches the state store.

use crate::error::{OrchestratorError, Result};
use serde_json::Value;
use uuid::Uuid;

/// Maximum serialized size for parameter and result bags (1MB)
const MAX_JSON_SIZE_BYTES: usize = 1024 * 1024;

/// Maximum nesting depth for parameter and result bags
const MAX_JSON_DEPTH: usize = 10;

/// Maximum length of capability, category and task-type tags
const MAX_TAG_LENGTH: usize = 128;

/// Validates that an identifier is a well-formed UUID
pub fn validate_uuid(field: &str, value: &str) -> Result<()> {
    Uuid::parse_str(value).map(|_| ()).map_err(|_| {
        OrchestratorError::Validation(format!("{field} is not a valid UUID: {value:?}"))
    })
}

/// Validates a non-empty identifier that is safe to embed in a store key
pub fn validate_key_segment(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(OrchestratorError::Validation(format!(
            "{field} must not be empty"
        )));
    }
    if value.chars().any(|c| c.is_whitespace() || matches!(c, '*' | '?' | ':')) {
        return Err(OrchestratorError::Validation(format!(
            "{field} contains characters not allowed in keys: {value:?}"
        )));
    }
    Ok(())
}

/// Capability and category tags: lowercase ascii, digits and underscores
pub fn validate_tag(field: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > MAX_TAG_LENGTH {
        return Err(OrchestratorError::Validation(format!(
            "{field} must be 1..={MAX_TAG_LENGTH} characters"
        )));
    }
    let valid = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(OrchestratorError::Validation(format!(
            "{field} must be snake_case: {value:?}"
        )));
    }
    Ok(())
}

/// Validates a JSON bag for size and nesting depth
pub fn validate_json_bag(field: &str, value: &Value) -> Result<()> {
    let serialized = serde_json::to_string(value)?;
    if serialized.len() > MAX_JSON_SIZE_BYTES {
        return Err(OrchestratorError::Validation(format!(
            "{field} too large: {} bytes (max: {MAX_JSON_SIZE_BYTES})",
            serialized.len()
        )));
    }
    validate_json_depth(field, value, 0)
}

fn validate_json_depth(field: &str, value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_JSON_DEPTH {
        return Err(OrchestratorError::Validation(format!(
            "{field} nesting too deep: {depth} (max: {MAX_JSON_DEPTH})"
        )));
    }
    match value {
        Value::Object(map) => map
            .values()
            .try_for_each(|v| validate_json_depth(field, v, depth + 1)),
        Value::Array(items) => items
            .iter()
            .try_for_each(|v| validate_json_depth(field, v, depth + 1)),
        _ => Ok(()),
    }
}
