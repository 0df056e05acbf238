//! Repair of mis-encoded text.
//!
//! Upstream sources regularly hand over Latin-1 bytes labelled as UTF-8. Rust strings are
//! always valid UTF-8, so the repair happens on raw bytes ([`repair`]) before anything is
//! decoded; [`normalize`] walks an already-decoded value and applies the same contract to
//! every string in it.

use serde_json::{Map, Value};
use std::borrow::Cow;

/// Returns `raw` as valid UTF-8 text. Never fails.
///
/// 1. Valid UTF-8 is returned borrowed and unchanged.
/// 2. Otherwise every byte of an invalid run is read as Latin-1, keeping the valid runs
///    around it as they are.
/// 3. C1 control bytes (0x80..=0x9F) in an invalid run are not printable Latin-1 and
///    become U+FFFD. The rest of the input is still repaired, so one stray Windows-1252
///    quote does not cost the accents elsewhere on the line.
pub fn repair(raw: &[u8]) -> Cow<'_, str> {
    if let Ok(text) = std::str::from_utf8(raw) {
        return Cow::Borrowed(text);
    }

    Cow::Owned(reinterpret_latin1(raw))
}

fn reinterpret_latin1(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len() + raw.len() / 2);

    for chunk in raw.utf8_chunks() {
        out.push_str(chunk.valid());
        for &byte in chunk.invalid() {
            if (0x80..=0x9F).contains(&byte) {
                out.push(char::REPLACEMENT_CHARACTER);
            } else {
                // Latin-1 maps each byte to the code point of the same value.
                out.push(char::from(byte));
            }
        }
    }

    out
}

/// Returns a structurally identical value in which every string is repaired text.
///
/// Mappings and sequences are walked recursively; numbers, booleans and null are returned
/// untouched. A value whose strings are already valid UTF-8 comes back unchanged.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(normalize_string(text)),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::Object(map) => Value::Object(normalize_record(map)),
        other => other,
    }
}

/// [`normalize`] for a mapping, keys included.
pub fn normalize_record(record: Map<String, Value>) -> Map<String, Value> {
    record
        .into_iter()
        .map(|(key, value)| (normalize_string(key), normalize(value)))
        .collect()
}

fn normalize_string(text: String) -> String {
    let repaired = match repair(text.as_bytes()) {
        Cow::Borrowed(_) => None,
        Cow::Owned(repaired) => Some(repaired),
    };
    repaired.unwrap_or(text)
}
