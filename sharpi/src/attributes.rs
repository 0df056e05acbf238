//! Coercion of the loosely-typed `custom_attributes` field.
//!
//! Sources send this field as a JSON object, as the text rendering of a Python-style
//! literal (`"{'color': 'azul', 'weight': 1.5}"`), or not at all. Whatever arrives, the
//! result is a mapping; anything unreadable becomes an empty one.

use serde_json::{Map, Number, Value};

/// Deepest nesting of mappings, lists and tuples accepted in literal text.
const MAX_DEPTH: usize = 128;

/// Returns the custom attributes held by `value`, or an empty mapping.
pub fn coerce(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        Value::String(text) => coerce_text(text),
        _ => Map::new(),
    }
}

fn coerce_text(text: &str) -> Map<String, Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "None" {
        return Map::new();
    }

    match parse_literal(trimmed) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            tracing::debug!("custom attributes are not a mapping, ignoring them");
            Map::new()
        }
        Err(e) => {
            tracing::debug!(error = %e, "could not parse custom attributes, ignoring them");
            Map::new()
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum LiteralError {
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unexpected character {found:?} at offset {offset}")]
    Unexpected { found: char, offset: usize },
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("invalid escape sequence at offset {0}")]
    InvalidEscape(usize),
    #[error("trailing characters at offset {0}")]
    TrailingCharacters(usize),
    #[error("nesting deeper than {max} levels at offset {0}", max = MAX_DEPTH)]
    TooDeep(usize),
}

/// Parses the text rendering of a literal structure into a JSON value.
///
/// Accepts mappings, lists and tuples (both become arrays), single- or double-quoted
/// strings, integers, floats, `True`/`False`/`None` and their JSON spellings. Mapping keys
/// that are not strings are rendered as text.
pub fn parse_literal(text: &str) -> Result<Value, LiteralError> {
    let mut parser = LiteralParser {
        chars: text.char_indices().peekable(),
        len: text.len(),
        depth: 0,
    };
    let value = parser.value()?;
    parser.skip_whitespace();
    match parser.chars.peek() {
        None => Ok(value),
        Some(&(offset, _)) => Err(LiteralError::TrailingCharacters(offset)),
    }
}

struct LiteralParser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    len: usize,
    depth: usize,
}

impl LiteralParser<'_> {
    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn peek(&mut self) -> Result<(usize, char), LiteralError> {
        self.skip_whitespace();
        self.chars.peek().copied().ok_or(LiteralError::UnexpectedEnd)
    }

    fn expect(&mut self, expected: char) -> Result<(), LiteralError> {
        let (offset, found) = self.peek()?;
        if found != expected {
            return Err(LiteralError::Unexpected { found, offset });
        }
        self.chars.next();
        Ok(())
    }

    fn value(&mut self) -> Result<Value, LiteralError> {
        let (offset, c) = self.peek()?;
        match c {
            '{' => self.nested(offset, |p| p.mapping()),
            '[' => self.nested(offset, |p| p.sequence('[', ']')),
            '(' => self.nested(offset, |p| p.sequence('(', ')')),
            '\'' | '"' => self.string().map(Value::String),
            '-' | '+' | '.' | '0'..='9' => self.number(),
            c if c.is_alphabetic() => self.keyword(),
            found => Err(LiteralError::Unexpected { found, offset }),
        }
    }

    /// Parses a container one level deeper, refusing to go past [`MAX_DEPTH`].
    fn nested(
        &mut self,
        offset: usize,
        parse: impl FnOnce(&mut Self) -> Result<Value, LiteralError>,
    ) -> Result<Value, LiteralError> {
        if self.depth == MAX_DEPTH {
            return Err(LiteralError::TooDeep(offset));
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn mapping(&mut self) -> Result<Value, LiteralError> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            if self.peek()?.1 == '}' {
                self.chars.next();
                return Ok(Value::Object(map));
            }
            let key = match self.value()? {
                Value::String(key) => key,
                other => other.to_string(),
            };
            self.expect(':')?;
            let value = self.value()?;
            map.insert(key, value);
            if !self.separator('}')? {
                return Ok(Value::Object(map));
            }
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Value, LiteralError> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            if self.peek()?.1 == close {
                self.chars.next();
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            if !self.separator(close)? {
                return Ok(Value::Array(items));
            }
        }
    }

    /// Consumes `,` (returns true, more items may follow) or `close` (returns false).
    fn separator(&mut self, close: char) -> Result<bool, LiteralError> {
        let (offset, found) = self.peek()?;
        self.chars.next();
        match found {
            ',' => Ok(true),
            c if c == close => Ok(false),
            found => Err(LiteralError::Unexpected { found, offset }),
        }
    }

    fn string(&mut self) -> Result<String, LiteralError> {
        let (_, quote) = self.chars.next().ok_or(LiteralError::UnexpectedEnd)?;
        let mut out = String::new();
        loop {
            let (offset, c) = self.chars.next().ok_or(LiteralError::UnexpectedEnd)?;
            match c {
                c if c == quote => return Ok(out),
                '\\' => out.push(self.escape(offset)?),
                c => out.push(c),
            }
        }
    }

    fn escape(&mut self, offset: usize) -> Result<char, LiteralError> {
        let (_, c) = self.chars.next().ok_or(LiteralError::UnexpectedEnd)?;
        let c = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' | '\'' | '"' | '/' => c,
            'x' => self.code_point(2, offset)?,
            'u' => self.code_point(4, offset)?,
            'U' => self.code_point(8, offset)?,
            _ => return Err(LiteralError::InvalidEscape(offset)),
        };
        Ok(c)
    }

    fn code_point(&mut self, digits: usize, offset: usize) -> Result<char, LiteralError> {
        let mut hex = String::with_capacity(digits);
        for _ in 0..digits {
            let (_, c) = self.chars.next().ok_or(LiteralError::UnexpectedEnd)?;
            hex.push(c);
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or(LiteralError::InvalidEscape(offset))
    }

    fn number(&mut self) -> Result<Value, LiteralError> {
        let mut text = String::new();
        while let Some((_, c)) = self
            .chars
            .next_if(|(_, c)| c.is_ascii_alphanumeric() || matches!(*c, '-' | '+' | '.' | '_'))
        {
            if c != '_' {
                text.push(c);
            }
        }

        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Number(n.into()));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or(LiteralError::InvalidNumber(text))
    }

    fn keyword(&mut self) -> Result<Value, LiteralError> {
        let start = self.chars.peek().map(|&(offset, _)| offset).unwrap_or(self.len);
        let mut word = String::new();
        while let Some((_, c)) = self.chars.next_if(|(_, c)| c.is_alphanumeric() || *c == '_') {
            word.push(c);
        }
        match word.as_str() {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            _ => Err(LiteralError::Unexpected {
                found: word.chars().next().unwrap_or(' '),
                offset: start,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mapping_is_returned_as_is() {
        let value = json!({"color": "azul", "weight": 1.5});
        assert_eq!(Value::Object(coerce(&value)), value);
    }

    #[test]
    fn empty_and_none_text_become_empty() {
        assert!(coerce(&json!("")).is_empty());
        assert!(coerce(&json!("   ")).is_empty());
        assert!(coerce(&json!("None")).is_empty());
    }

    #[test]
    fn other_types_become_empty() {
        assert!(coerce(&Value::Null).is_empty());
        assert!(coerce(&json!(12)).is_empty());
        assert!(coerce(&json!(true)).is_empty());
        assert!(coerce(&json!([1, 2])).is_empty());
    }

    #[test]
    fn python_literal_text_is_parsed() {
        let text = json!("{'color': 'azul', 'weight': 1.5, 'fragile': True, 'lot': None, 'sizes': (38, 40), 'n': -3}");
        assert_eq!(
            Value::Object(coerce(&text)),
            json!({
                "color": "azul",
                "weight": 1.5,
                "fragile": true,
                "lot": null,
                "sizes": [38, 40],
                "n": -3
            })
        );
    }

    #[test]
    fn json_text_is_parsed() {
        let text = json!(r#"{"origem": "importado", "tags": ["a", "b"], "ok": false}"#);
        assert_eq!(
            Value::Object(coerce(&text)),
            json!({"origem": "importado", "tags": ["a", "b"], "ok": false})
        );
    }

    #[test]
    fn nested_and_escaped_values() {
        let text = json!(r#"{'a': {'b': [1, {'c': 'it\'s'}]}, 'd': "line\nbreak", 1: 'one',}"#);
        assert_eq!(
            Value::Object(coerce(&text)),
            json!({"a": {"b": [1, {"c": "it's"}]}, "d": "line\nbreak", "1": "one"})
        );
    }

    #[test]
    fn malformed_text_becomes_empty() {
        for text in [
            "{'a': 1",
            "{'a' 1}",
            "not a literal",
            "{'a': 1} trailing",
            "[1, 2, 3]",
            "'just a string'",
            "{'a': 1.2.3}",
            "{'a': '\\q'}",
        ] {
            assert!(coerce(&json!(text)).is_empty(), "{text} should be ignored");
        }
    }

    #[test]
    fn deep_nesting_is_refused() {
        let depth = 200_000;
        let text = format!("{{'a': {}1{}}}", "[".repeat(depth), "]".repeat(depth));
        assert!(coerce(&json!(text)).is_empty());
        assert!(matches!(
            parse_literal(&text),
            Err(LiteralError::TooDeep(_))
        ));

        let at_limit = format!("{}{}", "[".repeat(MAX_DEPTH), "]".repeat(MAX_DEPTH));
        assert!(parse_literal(&at_limit).is_ok());
        let past_limit = format!("{}{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert_eq!(
            parse_literal(&past_limit),
            Err(LiteralError::TooDeep(MAX_DEPTH))
        );
    }

    #[test]
    fn literal_errors_are_reported() {
        assert_eq!(parse_literal("{"), Err(LiteralError::UnexpectedEnd));
        assert_eq!(parse_literal("1 2"), Err(LiteralError::TrailingCharacters(2)));
        assert_eq!(
            parse_literal("1e"),
            Err(LiteralError::InvalidNumber("1e".into()))
        );
    }
}
