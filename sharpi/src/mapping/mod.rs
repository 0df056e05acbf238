//! Mapping of tap records into the partner API payloads.
//!
//! Every mapper produces the complete field set of its entity: fields the record does not
//! carry are sent as null or as their default, so the remote contract never sees a key
//! appear or disappear between records. Mapping never fails a record. A value of the wrong
//! shape (a list where text is expected, a word where a price is expected) is logged and
//! replaced by the field's default; the API stays the judge of what it accepts.

mod customer;
mod price;
mod product;

use crate::attributes;
use crate::metrics_defs::FIELDS_DEFAULTED;
use crate::normalize::normalize_record;
use crate::types::{CanonicalRecord, EntityKind, InputRecord, NaturalKey};
use serde_json::{Map, Value};
use shared::counter;

/// A mapped record: the payload to send and the key to address it by on conflict.
#[derive(Clone, Debug, PartialEq)]
pub struct Mapped {
    pub payload: CanonicalRecord,
    pub key: NaturalKey,
}

/// A field whose value has the wrong shape for its kind.
#[derive(thiserror::Error, Debug, PartialEq)]
#[error("field {field:?} holds {found}, expected {expected}")]
pub struct MappingError {
    pub field: String,
    pub expected: &'static str,
    pub found: &'static str,
}

impl MappingError {
    fn new(field: &str, expected: &'static str, value: &Value) -> Self {
        MappingError {
            field: field.to_string(),
            expected,
            found: kind_of(value),
        }
    }

    /// Prefixes the field path with the name of the enclosing mapping.
    fn within(mut self, parent: &str) -> Self {
        self.field = format!("{parent}.{}", self.field);
        self
    }
}

type Mapper = fn(&InputRecord) -> Mapped;

impl EntityKind {
    fn mapper(self) -> Mapper {
        match self {
            EntityKind::Product => product::map,
            EntityKind::Price => price::map,
            EntityKind::Customer => customer::map,
        }
    }

    /// Maps `record` into this kind's payload and natural key.
    pub fn map(self, record: &InputRecord) -> Mapped {
        let mapped = (self.mapper())(record);
        // Decoded strings are valid UTF-8, so this pass leaves them untouched. Mis-encoded
        // bytes are repaired earlier, in `singer::parse_message`, before the line is parsed.
        Mapped {
            payload: normalize_record(mapped.payload),
            key: mapped.key,
        }
    }
}

/// Logs a field value that is dropped for having the wrong shape.
fn discard(err: &MappingError) {
    tracing::warn!(field = %err.field, error = %err, "sending default for malformed field");
    counter!(FIELDS_DEFAULTED, "field" => err.field.clone()).increment(1);
}

/// The checked value of a field, or `default` when the source value has the wrong shape.
fn or_default(checked: Result<Value, MappingError>, default: Value) -> Value {
    checked.unwrap_or_else(|err| {
        discard(&err);
        default
    })
}

fn or_null(checked: Result<Value, MappingError>) -> Value {
    or_default(checked, Value::Null)
}

/// The `active` flag shared by every entity, true unless the source says otherwise.
fn active(record: &InputRecord) -> Value {
    or_default(flag(record, "active", true), Value::Bool(true))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "text",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

fn field<'a>(record: &'a InputRecord, name: &str) -> &'a Value {
    record.get(name).unwrap_or(&Value::Null)
}

/// Text field. Numbers are rendered as text.
fn text(record: &InputRecord, name: &str) -> Result<Value, MappingError> {
    match field(record, name) {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(s.clone())),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        other => Err(MappingError::new(name, "text", other)),
    }
}

/// Text field with a default for null, missing or blank values.
fn text_or(record: &InputRecord, name: &str, default: &str) -> Result<Value, MappingError> {
    match text(record, name)? {
        Value::String(s) if !s.trim().is_empty() => Ok(Value::String(s)),
        _ => Ok(Value::String(default.to_string())),
    }
}

/// Text field that takes part in a natural key. Surrounding whitespace is dropped and blank
/// text reads as missing, so the payload carries exactly what the key is built from.
fn key_text(record: &InputRecord, name: &str) -> Result<Value, MappingError> {
    match text(record, name)? {
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(s.trim().to_string())),
        other => Ok(other),
    }
}

/// Identifier field. Numbers are sent as numbers, text is trimmed and blank text is null.
fn id(record: &InputRecord, name: &str) -> Result<Value, MappingError> {
    match field(record, name) {
        value @ (Value::Null | Value::Number(_)) => Ok(value.clone()),
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(s.trim().to_string())),
        other => Err(MappingError::new(name, "an identifier", other)),
    }
}

/// Decimal field serialized as text so no floating point drift reaches the wire.
fn decimal(record: &InputRecord, name: &str) -> Result<Value, MappingError> {
    match field(record, name) {
        Value::Null => Ok(Value::Null),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        value @ Value::String(s) => {
            let s = s.trim();
            match s.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(Value::String(s.to_string())),
                _ => Err(MappingError::new(name, "a decimal", value)),
            }
        }
        other => Err(MappingError::new(name, "a decimal", other)),
    }
}

/// Boolean field with a default for null or missing values.
fn flag(record: &InputRecord, name: &str, default: bool) -> Result<Value, MappingError> {
    let value = field(record, name);
    let flag = match value {
        Value::Null => Some(default),
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Some(true),
            "false" | "f" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    };
    flag.map(Value::Bool)
        .ok_or_else(|| MappingError::new(name, "a boolean", value))
}

/// List of identifiers, empty when missing.
fn id_list(record: &InputRecord, name: &str) -> Result<Value, MappingError> {
    match field(record, name) {
        Value::Null => Ok(Value::Array(Vec::new())),
        Value::Array(items) => {
            for item in items {
                if !matches!(item, Value::String(_) | Value::Number(_)) {
                    return Err(MappingError::new(name, "a list of identifiers", item));
                }
            }
            Ok(Value::Array(items.clone()))
        }
        other => Err(MappingError::new(name, "a list of identifiers", other)),
    }
}

fn custom_attributes(record: &InputRecord, name: &str) -> Value {
    Value::Object(attributes::coerce(field(record, name)))
}

/// Nested mapping field; a missing one reads as empty.
fn nested<'a>(record: &'a InputRecord, name: &str) -> Result<Option<&'a Map<String, Value>>, MappingError> {
    match field(record, name) {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        other => Err(MappingError::new(name, "a mapping", other)),
    }
}

/// Text of a mapped key field. Key fields are trimmed when mapped, so this is their text
/// as sent in the payload.
fn key_part(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
