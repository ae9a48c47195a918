use crate::{json_type_name, Record};
use serde_json::Value;
use thiserror::Error;

pub const MODEL_FIELDS: [&str; 3] = ["name", "file", "description"];
pub const SENSOR_FIELDS: [&str; 1] = ["unique_id"];
pub const RUN_FIELDS: [&str; 2] = ["file", "config_idx"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing fields for {entity}: {}", .missing.join(", "))]
    MissingFields {
        entity: &'static str,
        missing: Vec<String>,
    },
    #[error("Missing fields in at least one {entity} (item {index}): {}", .missing.join(", "))]
    MissingFieldsAt {
        entity: &'static str,
        index: usize,
        missing: Vec<String>,
    },
    #[error("Expected {expected} for {what}, found {found}")]
    InvalidShape {
        what: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Unique ID already exists: {unique_id}")]
    DuplicateId { unique_id: String },
    #[error("Invalid history index: {0}")]
    InvalidIndex(String),
    #[error("Invalid JSON body: {0}")]
    MalformedBody(String),
}

/// Required keys absent from `value`. Presence is what counts; a `null` value
/// still satisfies the requirement. Non-objects miss every key.
pub fn missing_fields(value: &Value, required: &[&str]) -> Vec<String> {
    match value.as_object() {
        Some(map) => required
            .iter()
            .filter(|key| !map.contains_key(**key))
            .map(|key| key.to_string())
            .collect(),
        None => required.iter().map(|key| key.to_string()).collect(),
    }
}

fn require(
    value: &Value,
    entity: &'static str,
    required: &[&str],
) -> Result<(), ValidationError> {
    let missing = missing_fields(value, required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MissingFields { entity, missing })
    }
}

fn require_each(
    items: &[Value],
    entity: &'static str,
    required: &[&str],
) -> Result<(), ValidationError> {
    for (index, item) in items.iter().enumerate() {
        let missing = missing_fields(item, required);
        if !missing.is_empty() {
            return Err(ValidationError::MissingFieldsAt {
                entity,
                index,
                missing,
            });
        }
    }
    Ok(())
}

pub fn validate_model(value: &Value) -> Result<(), ValidationError> {
    require(value, "model", &MODEL_FIELDS)
}

pub fn validate_models(items: &[Value]) -> Result<(), ValidationError> {
    require_each(items, "model", &MODEL_FIELDS)
}

pub fn validate_sensor(value: &Value) -> Result<(), ValidationError> {
    require(value, "sensor", &SENSOR_FIELDS)
}

pub fn validate_sensors(items: &[Value]) -> Result<(), ValidationError> {
    require_each(items, "sensor", &SENSOR_FIELDS)
}

pub fn validate_run(value: &Value) -> Result<(), ValidationError> {
    require(value, "test run", &RUN_FIELDS)
}

pub fn expect_array<'a>(
    value: &'a Value,
    what: &'static str,
) -> Result<&'a [Value], ValidationError> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or(ValidationError::InvalidShape {
            what,
            expected: "array",
            found: json_type_name(value),
        })
}

pub fn expect_object<'a>(
    value: &'a Value,
    what: &'static str,
) -> Result<&'a Record, ValidationError> {
    value.as_object().ok_or(ValidationError::InvalidShape {
        what,
        expected: "object",
        found: json_type_name(value),
    })
}

/// Converts validated items to records. Callers validate first, so every
/// element is an object; anything else is dropped.
pub fn into_records(items: &[Value]) -> Vec<Record> {
    items
        .iter()
        .filter_map(|item| item.as_object().cloned())
        .collect()
}

/// Resolves a reverse index (0 = most recent) against a list of `len` entries
/// and returns the forward position. Integer strings are accepted since form
/// submissions send numbers as text.
pub fn resolve_reverse_index(index: &Value, len: usize) -> Result<usize, ValidationError> {
    let parsed = match index {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    let reverse = parsed.ok_or_else(|| ValidationError::InvalidIndex(index.to_string()))?;
    let reverse = usize::try_from(reverse)
        .map_err(|_| ValidationError::InvalidIndex(index.to_string()))?;
    if reverse >= len {
        return Err(ValidationError::InvalidIndex(format!(
            "{reverse} out of range for {len} entries"
        )));
    }
    Ok(len - 1 - reverse)
}
