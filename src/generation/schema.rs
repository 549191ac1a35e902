//! Structured-output parsing and coercion
//!
//! The generation service is asked for JSON but routinely wraps it in prose,
//! code fences, or returns numbers as strings. The adapter recovers the first
//! JSON object it can find and coerces each declared field to its kind.

use super::client::RawPayload;
use super::request::{FieldKind, SchemaDescriptor};
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::OnceLock;

/// Fields of a successfully parsed structured output
pub type StructuredFields = Map<String, Value>;

/// Reason a payload could not be shaped into the declared schema
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("no JSON object found in output")]
    NoJsonObject,

    #[error("output is JSON but not an object")]
    NotAnObject,

    #[error("required field '{field}' is missing")]
    MissingField { field: String },

    #[error("field '{field}' expected {expected:?}, found {found}")]
    InvalidField {
        field: String,
        expected: FieldKind,
        found: String,
    },
}

fn fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fence pattern is valid")
    })
}

/// Parses raw output into a declared, typed shape
pub struct SchemaAdapter;

impl SchemaAdapter {
    /// Parse and coerce a payload against a schema
    pub fn parse(
        schema: &SchemaDescriptor,
        payload: &RawPayload,
    ) -> Result<StructuredFields, SchemaError> {
        let value = match payload {
            RawPayload::Structured(value) => value.clone(),
            RawPayload::Text(text) => extract_json(text).ok_or(SchemaError::NoJsonObject)?,
        };

        let Value::Object(mut object) = value else {
            return Err(SchemaError::NotAnObject);
        };

        for field in &schema.fields {
            match object.remove(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(SchemaError::MissingField {
                            field: field.name.clone(),
                        });
                    }
                }
                Some(raw) => {
                    let coerced =
                        coerce(field.kind, &raw).ok_or_else(|| SchemaError::InvalidField {
                            field: field.name.clone(),
                            expected: field.kind,
                            found: raw.to_string(),
                        })?;
                    object.insert(field.name.clone(), coerced);
                }
            }
        }

        Ok(object)
    }
}

/// Find the first JSON object in free-form text
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    for captures in fence_pattern().captures_iter(trimmed) {
        if let Some(body) = captures.get(1) {
            if let Ok(value) = serde_json::from_str::<Value>(body.as_str().trim()) {
                return Some(value);
            }
        }
    }

    balanced_object(trimmed).and_then(|candidate| serde_json::from_str(candidate).ok())
}

/// Return the first brace-balanced `{...}` region, ignoring braces in strings
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn coerce(kind: FieldKind, value: &Value) -> Option<Value> {
    match kind {
        FieldKind::String => coerce_string(value).map(Value::String),
        FieldKind::Integer => coerce_integer(value).map(|n| Value::Number(n.into())),
        FieldKind::Float => coerce_float(value)
            .and_then(Number::from_f64)
            .map(Value::Number),
        FieldKind::Boolean => coerce_bool(value).map(Value::Bool),
        FieldKind::StringList => coerce_string_list(value).map(|items| {
            Value::Array(items.into_iter().map(Value::String).collect())
        }),
    }
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => items.iter().map(coerce_string).collect(),
        Value::String(s) => Some(
            s.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    }
}
